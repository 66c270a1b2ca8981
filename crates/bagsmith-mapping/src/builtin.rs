//! Mappers compiled into bagsmith.

use crate::xpath::{Namespaces, XPath};
use crate::{Mapper, MappingError, MappingInput};
use bagsmith_schema::BagInfo;
use regex::Regex;

pub const OAI_DC: &str = "oai-dc";

const OAI_NS: &str = "http://www.openarchives.org/OAI/2.0/";
const OAI_DC_NS: &str = "http://www.openarchives.org/OAI/2.0/oai_dc/";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

const SOURCE_ORGANIZATION: &str = "https://d-nb.info/gnd/0";
const IDENTIFIER_PATH: &str = "./GetRecord/record/header/identifier";
const DC_PATH: &str = "./GetRecord/record/metadata/oai_dc:dc";

/// DOIs and URN:NBNs among `dc:identifier` values.
const PERSISTENT_IDENTIFIER: &str = r"(?i)10\.\d{4,9}/[-._;()/:A-Z0-9]+|urn:nbn";

/// Demo mapper for an OAI-PMH `GetRecord` response carrying `oai_dc` metadata.
///
/// The record identifier `oai:<system>:<id>` is split at its last colon into
/// `Origin-System-Identifier` and `External-Identifier`. Dublin Core creator,
/// title and rights map to `DC-*` tags; only DOI and URN:NBN identifiers are
/// kept as `DC-Terms-Identifier`. Empty selections are left out.
pub struct OaiDcMapper {
    identifier: XPath,
    fields: Vec<(&'static str, XPath)>,
    dc_identifier: XPath,
    persistent_identifier: Regex,
}

impl OaiDcMapper {
    pub const DISPLAY_NAME: &'static str = "OAI-PMH Dublin Core";
    pub const DESCRIPTION: &'static str =
        "Demo mapper for XML metadata obtained through the OAI-PMH protocol (oai_dc format).";

    pub fn new() -> Result<Self, String> {
        let mut ns = Namespaces::new();
        ns.insert(String::new(), OAI_NS.to_owned());
        ns.insert("oai_dc".to_owned(), OAI_DC_NS.to_owned());
        ns.insert("dc".to_owned(), DC_NS.to_owned());

        let dc = |element: &str| XPath::parse(&format!("{DC_PATH}/dc:{element}"), &ns);
        Ok(Self {
            identifier: XPath::parse(IDENTIFIER_PATH, &ns)?,
            fields: vec![
                ("DC-Creator", dc("creator")?),
                ("DC-Title", dc("title")?),
                ("DC-Rights", dc("rights")?),
            ],
            dc_identifier: dc("identifier")?,
            persistent_identifier: Regex::new(PERSISTENT_IDENTIFIER).map_err(|e| e.to_string())?,
        })
    }
}

impl Mapper for OaiDcMapper {
    fn map(&self, input: &MappingInput) -> Result<BagInfo, MappingError> {
        let doc = input.document()?;
        let mut out = BagInfo::new();
        out.push("Source-Organization", SOURCE_ORGANIZATION);

        if let Some(id) = self.identifier.select(&doc).into_iter().next() {
            match id.rsplit_once(':') {
                Some((system, local)) => {
                    out.push("Origin-System-Identifier", system);
                    out.push("External-Identifier", local);
                }
                None => {
                    return Err(MappingError::Failed(format!(
                        "record identifier '{id}' has no ':' separator"
                    )));
                }
            }
        }

        for (key, path) in &self.fields {
            out.extend_values(key, path.select(&doc));
        }

        let identifiers: Vec<String> = self
            .dc_identifier
            .select(&doc)
            .into_iter()
            .filter(|v| self.persistent_identifier.is_match(v))
            .collect();
        out.extend_values("DC-Terms-Identifier", identifiers);
        Ok(out)
    }
}
