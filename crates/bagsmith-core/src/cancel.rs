use crate::CoreError;
use fs2::FileExt;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a build and whoever may
/// cancel it. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been tripped.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trip `token` on the first Ctrl-C; exit on the second.
pub fn install_signal_handler(token: &CancelToken) {
    let token = token.clone();
    let _ = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(1);
        }
        token.cancel();
        eprintln!("\ncancellation requested, cleaning up...");
    });
}

/// Exclusive advisory lock on a destination directory.
///
/// Held around the existence check and rename of a publish so that two
/// builders targeting the same parent cannot both claim one destination
/// (renaming onto an existing empty directory would otherwise succeed).
/// The lock is taken on the directory itself, so no lock file is left
/// behind in the destination namespace.
pub struct PublishLock {
    dir: File,
}

impl PublishLock {
    pub fn acquire(dir: &Path) -> Result<Self, CoreError> {
        let file = File::open(dir)?;
        file.lock_exclusive()?;
        Ok(Self { dir: file })
    }
}

impl Drop for PublishLock {
    fn drop(&mut self) {
        let _ = self.dir.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(CoreError::Cancelled)));
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let other = File::open(dir.path()).unwrap();
        {
            let _lock = PublishLock::acquire(dir.path()).unwrap();
            assert!(other.try_lock_exclusive().is_err());
        }
        assert!(other.try_lock_exclusive().is_ok());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
