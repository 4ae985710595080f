use thiserror::Error;

/// Record-level failures. Fatal for the single record, never for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("object record has an empty name")]
    EmptyName,
}

#[cfg(test)]
mod tests {
    use super::RecordError;

    #[test]
    fn empty_name_message_is_stable() {
        assert_eq!(
            RecordError::EmptyName.to_string(),
            "object record has an empty name"
        );
    }
}
