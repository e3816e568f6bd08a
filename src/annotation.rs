use std::{collections::HashMap, fmt, num::ParseIntError, str::FromStr};

use crate::error::GraphError;

/// Caller chosen identifier for which variant of an operation
/// sequence a captured graph belongs to
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GraphAnnotation(pub i32);

impl GraphAnnotation {
    /// Capture and replay must not happen for this invocation
    pub const SKIP: Self = Self(-1);

    /// The baseline graph, used when the caller never picks one
    pub const DEFAULT: Self = Self(0);

    /// Run option entry that selects the annotation for a run
    pub const RUN_OPTION_KEY: &'static str = "gpu_graph_id";

    pub fn is_skip(self) -> bool {
        self == Self::SKIP
    }

    /// Read the annotation from a run's option entries, falling back
    /// to `DEFAULT` when none was given
    pub fn from_run_options<E: fmt::Debug>(options: &HashMap<String, String>) -> Result<Self, GraphError<E>> {
        match options.get(Self::RUN_OPTION_KEY) {
            None => Ok(Self::DEFAULT),
            Some(value) => value.parse().map_err(|e| {
                GraphError::Precondition(format!("invalid {} run option {value:?}: {e}", Self::RUN_OPTION_KEY))
            }),
        }
    }
}

impl Default for GraphAnnotation {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<i32> for GraphAnnotation {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl FromStr for GraphAnnotation {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for GraphAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SKIP => write!(f, "skip"),
            Self(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_values() {
        assert_eq!(GraphAnnotation::default(), GraphAnnotation::DEFAULT);
        assert_eq!(GraphAnnotation::from(-1), GraphAnnotation::SKIP);
        assert!(GraphAnnotation::SKIP.is_skip());
        assert!(!GraphAnnotation::DEFAULT.is_skip());
        assert_eq!(GraphAnnotation::SKIP.to_string(), "skip");
        assert_eq!(GraphAnnotation(7).to_string(), "7");
    }

    #[test]
    fn parse_run_options() {
        let mut options = HashMap::new();
        let parsed = GraphAnnotation::from_run_options::<()>(&options);
        assert!(matches!(parsed, Ok(GraphAnnotation::DEFAULT)));

        options.insert("gpu_graph_id".to_string(), " 3 ".to_string());
        assert!(matches!(GraphAnnotation::from_run_options::<()>(&options), Ok(GraphAnnotation(3))));

        options.insert("gpu_graph_id".to_string(), "-1".to_string());
        assert!(matches!(GraphAnnotation::from_run_options::<()>(&options), Ok(GraphAnnotation::SKIP)));

        options.insert("gpu_graph_id".to_string(), "three".to_string());
        assert!(matches!(GraphAnnotation::from_run_options::<()>(&options), Err(GraphError::Precondition(_))));
    }
}
