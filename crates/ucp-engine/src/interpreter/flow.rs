//! How a sequence stops early

use ucp_core::errors::{ExError, ExErrorKind, OperationError, UcpError};
use ucp_core::model::Failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum HaltClass {
    /// May be diverted into an enclosing `catch_branch`
    Recoverable,
    /// Stops scheduling; never caught, `finally` is not started
    Aborted,
    /// Bypasses `catch` and `finally` all the way to the top
    Fatal,
}

/// An unhandled error travelling up the operation tree
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Halt {
    pub class: HaltClass,
    pub kind: ExErrorKind,
    pub error: OperationError,
    /// Node the error is attributed to
    pub node_path: String,
}

impl Halt {
    pub fn from_error(err: &UcpError, node_path: &str) -> Self {
        let kind = err.kind();
        let class = if kind == ExErrorKind::Aborted {
            HaltClass::Aborted
        } else if kind.is_recoverable() {
            HaltClass::Recoverable
        } else {
            HaltClass::Fatal
        };
        Self {
            class,
            kind,
            error: err.to_operation_error(),
            node_path: node_path.to_string(),
        }
    }

    pub fn aborted(node_path: &str) -> Self {
        Self::from_error(
            &UcpError::Aborted {
                node_path: node_path.to_string(),
            },
            node_path,
        )
    }

    pub fn is_recoverable(&self) -> bool {
        self.class == HaltClass::Recoverable
    }

    /// The halt to propagate when several happen side by side: the most
    /// severe, earliest in declared order on ties
    pub fn most_severe(halts: impl IntoIterator<Item = Halt>) -> Option<Halt> {
        halts.into_iter().fold(None, |worst: Option<Halt>, halt| match worst {
            Some(w) if w.class >= halt.class => Some(w),
            _ => Some(halt),
        })
    }

    pub fn to_failure(&self) -> Failure {
        Failure {
            code: self.error.code.clone(),
            message: self.error.message.clone(),
            node_path: Some(self.node_path.clone()),
        }
    }

    pub fn to_ex_error(&self) -> ExError {
        ExError::new(self.kind)
            .with_message(self.error.message.clone())
            .with_node_path(self.node_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_failure(path: &str) -> Halt {
        Halt::from_error(
            &UcpError::Driver {
                capability: "http".to_string(),
                action: "get".to_string(),
                message: "503".to_string(),
            },
            path,
        )
    }

    #[test]
    fn test_classification() {
        assert!(driver_failure("operations[0]").is_recoverable());

        let fatal = Halt::from_error(
            &UcpError::UnauthorizedCapability {
                capability: "llm".to_string(),
                node_path: "operations[1]".to_string(),
            },
            "operations[1]",
        );
        assert_eq!(fatal.class, HaltClass::Fatal);
        assert_eq!(fatal.error.code, "ERR_UNAUTHORIZED_CAPABILITY");

        let aborted = Halt::aborted("operations[2]");
        assert_eq!(aborted.class, HaltClass::Aborted);
        assert_eq!(aborted.to_failure().code, "ERR_ABORTED");
        assert_eq!(aborted.to_failure().node_path.as_deref(), Some("operations[2]"));
    }

    #[test]
    fn test_most_severe_prefers_earliest_on_ties() {
        let picked = Halt::most_severe(vec![
            driver_failure("a"),
            driver_failure("b"),
        ])
        .unwrap();
        assert_eq!(picked.node_path, "a");

        let picked = Halt::most_severe(vec![
            driver_failure("a"),
            Halt::aborted("b"),
            driver_failure("c"),
        ])
        .unwrap();
        assert_eq!(picked.node_path, "b");

        assert!(Halt::most_severe(Vec::new()).is_none());
    }
}
