use crate::registry::ResolvedMapper;
use crate::{MappingError, MappingInput};
use bagsmith_schema::BagInfo;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAPPING_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `mapper` on its own thread and wait at most `timeout` for the result.
///
/// The mapper sees only an owned copy of the source metadata and arguments.
/// A mapper that overruns keeps running detached until it returns; its result
/// is discarded.
pub fn invoke(
    mapper: &ResolvedMapper,
    source_metadata: Option<String>,
    timeout: Duration,
) -> Result<BagInfo, MappingError> {
    let input = MappingInput::new(source_metadata).with_args(mapper.args().clone());
    let implementation = mapper.implementation();
    let (tx, rx) = mpsc::channel();

    let name = mapper.descriptor().name.clone();
    std::thread::Builder::new()
        .name(format!("mapper-{name}"))
        .spawn(move || {
            let result = implementation.map(&input);
            // The receiver is gone after a timeout.
            let _ = tx.send(result);
        })
        .map_err(|e| MappingError::Crashed(format!("failed to start mapper thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            debug!("mapper '{name}' finished");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!("mapper '{name}' timed out after {timeout:?}");
            Err(MappingError::Timeout { after: timeout })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(MappingError::Crashed(format!("mapper '{name}' panicked")))
        }
    }
}
