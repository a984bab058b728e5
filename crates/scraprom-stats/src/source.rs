use std::sync::RwLock;

/// Name of the unit of work currently running, used when a stats call names no source.
#[derive(Debug, Default)]
pub struct ActiveSource {
    current: RwLock<Option<String>>,
}

impl ActiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(name.into());
        }
    }

    /// Clears the active source if it is still `name`.
    pub fn clear(&self, name: &str) {
        if let Ok(mut current) = self.current.write()
            && current.as_deref() == Some(name)
        {
            *current = None;
        }
    }

    pub fn current(&self) -> Option<String> {
        self.current.read().ok()?.clone()
    }

    /// Explicit source first, then the active one, then the empty string.
    pub fn resolve(&self, explicit: Option<&str>) -> String {
        match explicit {
            Some(name) => name.to_string(),
            None => self.current().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ActiveSource;

    #[test]
    fn resolves_in_priority_order() {
        let source = ActiveSource::new();
        assert_eq!(source.resolve(None), "");

        source.set("books");
        assert_eq!(source.resolve(None), "books");
        assert_eq!(source.resolve(Some("quotes")), "quotes");

        source.clear("quotes");
        assert_eq!(source.current().as_deref(), Some("books"));
        source.clear("books");
        assert_eq!(source.resolve(None), "");
    }
}
