/// Maps commands and event types onto transport subjects.
pub trait SubjectResolver: Send + Sync {
    /// Subject a command with the given name is published on.
    fn command_subject(&self, command_name: &str) -> String;

    /// Subject events of the given type are published on.
    fn event_subject(&self, event_type: &str) -> String;
}

/// Default resolver producing `"<prefix>.<name>"`.
///
/// An empty prefix yields the bare name.
#[derive(Debug, Clone)]
pub struct PrefixSubjectResolver {
    command_prefix: String,
    event_prefix: String,
}

impl PrefixSubjectResolver {
    /// Uses the same prefix for commands and events.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            command_prefix: prefix.clone(),
            event_prefix: prefix,
        }
    }

    /// Uses distinct prefixes for commands and events.
    pub fn with_prefixes(command_prefix: impl Into<String>, event_prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: command_prefix.into(),
            event_prefix: event_prefix.into(),
        }
    }

    fn join(prefix: &str, name: &str) -> String {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        }
    }
}

impl Default for PrefixSubjectResolver {
    fn default() -> Self {
        Self::with_prefixes("commands", "events")
    }
}

impl SubjectResolver for PrefixSubjectResolver {
    fn command_subject(&self, command_name: &str) -> String {
        Self::join(&self.command_prefix, command_name)
    }

    fn event_subject(&self, event_type: &str) -> String {
        Self::join(&self.event_prefix, event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefixes() {
        let resolver = PrefixSubjectResolver::default();
        assert_eq!(resolver.command_subject("ReserveStock"), "commands.ReserveStock");
        assert_eq!(resolver.event_subject("StockReserved"), "events.StockReserved");
    }

    #[test]
    fn test_shared_prefix() {
        let resolver = PrefixSubjectResolver::new("orders");
        assert_eq!(resolver.command_subject("Place"), "orders.Place");
        assert_eq!(resolver.event_subject("Placed"), "orders.Placed");
    }

    #[test]
    fn test_empty_prefix_yields_bare_name() {
        let resolver = PrefixSubjectResolver::new("");
        assert_eq!(resolver.event_subject("Done"), "Done");
    }
}
