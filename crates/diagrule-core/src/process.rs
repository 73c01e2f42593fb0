use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the target process a rule is bound to.
///
/// Supplied by the process discovery layer. The runtime instance id is what
/// `$(Process.RuntimeId)` resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub process_id: u32,
    pub runtime_instance_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub command_line: String,
}

impl ProcessHandle {
    pub fn new(process_id: u32, runtime_instance_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            process_id,
            runtime_instance_id,
            name: name.into(),
            command_line: String::new(),
        }
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }

    /// Runtime instance id in hyphenated form, e.g.
    /// `67e55044-10b1-426f-9247-bb680e5fe0c8`.
    pub fn runtime_id_string(&self) -> String {
        self.runtime_instance_id.hyphenated().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_id_is_hyphenated_lowercase() {
        let id = Uuid::parse_str("67E55044-10B1-426F-9247-BB680E5FE0C8").unwrap();
        let process = ProcessHandle::new(42, id, "app");
        assert_eq!(
            process.runtime_id_string(),
            "67e55044-10b1-426f-9247-bb680e5fe0c8"
        );
    }
}
