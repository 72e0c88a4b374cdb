use std::path::Path;

use figment::{
    providers::Data,
    value::{Dict, Map},
    Error, Metadata, Profile, Provider,
};

/// A file-backed configuration provider that reads and parses its source up front.
///
/// `figment`'s own file providers defer reading until the configuration is queried;
/// this one surfaces unreadable or unparsable files at load time instead.
pub struct EagerFileProvider {
    data: Map<Profile, Dict>,
    metadata: Metadata,
}

impl EagerFileProvider {
    pub fn from_yaml<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| e.to_string())?;
        let data = Data::<figment::providers::Yaml>::string(&raw).data()?;

        Ok(Self {
            data,
            metadata: Metadata::from("YAML file", path.as_ref()),
        })
    }
}

impl Provider for EagerFileProvider {
    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Ok(self.data.clone())
    }
}
