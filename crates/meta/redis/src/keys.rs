/// Renders the Redis keys of one store namespace.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn record(&self, id: &str) -> String {
        format!("{}:rec:{id}", self.prefix)
    }

    pub fn by_hash(&self, content_hash: &str) -> String {
        format!("{}:hash:{content_hash}", self.prefix)
    }

    pub fn refs(&self, storage_key: &str) -> String {
        format!("{}:refs:{storage_key}", self.prefix)
    }

    pub fn expires_index(&self) -> String {
        format!("{}:idx:expires", self.prefix)
    }

    pub fn uploaded_index(&self) -> String {
        format!("{}:idx:uploaded", self.prefix)
    }

    pub fn stats(&self) -> String {
        format!("{}:stats", self.prefix)
    }
}
