use super::store::SubscriptionStore;
use super::types::{Settings, StoreError};

impl SubscriptionStore {
    // ========================================================================
    // RSSHub Endpoints
    // ========================================================================

    /// Append an endpoint base URL
    pub fn add_endpoint(&self, url: &str) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.rsshub_endpoints.push(url.to_string());
            Ok(())
        })
    }

    /// Remove the endpoint at `index`, shifting later ones down
    pub fn remove_endpoint(&self, index: usize) -> Result<String, StoreError> {
        self.mutate(|doc| {
            let len = doc.rsshub_endpoints.len();
            if index >= len {
                return Err(StoreError::IndexOutOfRange { index, len });
            }
            Ok(doc.rsshub_endpoints.remove(index))
        })
    }

    pub fn list_endpoints(&self) -> Vec<String> {
        self.read(|doc| doc.rsshub_endpoints.clone())
    }

    pub fn endpoint(&self, index: usize) -> Result<String, StoreError> {
        self.read(|doc| {
            doc.rsshub_endpoints
                .get(index)
                .cloned()
                .ok_or(StoreError::IndexOutOfRange {
                    index,
                    len: doc.rsshub_endpoints.len(),
                })
        })
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn settings(&self) -> Settings {
        self.read(|doc| doc.settings.clone())
    }

    pub fn update_settings(&self, settings: Settings) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.settings = settings;
            Ok(())
        })
    }
}
