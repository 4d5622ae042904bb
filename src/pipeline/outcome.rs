/// Result contract of every phase.
///
/// Phases never fail a job. They return whatever they produced, flagged as
/// degraded with reasons when part of the work was lost.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome<T> {
    Complete(T),
    Degraded { value: T, reasons: Vec<String> },
}

impl<T> PhaseOutcome<T> {
    pub fn complete(value: T) -> Self {
        PhaseOutcome::Complete(value)
    }

    /// `Complete` when `reasons` is empty.
    pub fn degraded(value: T, reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            PhaseOutcome::Complete(value)
        } else {
            PhaseOutcome::Degraded { value, reasons }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, PhaseOutcome::Degraded { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            PhaseOutcome::Complete(value) | PhaseOutcome::Degraded { value, .. } => value,
        }
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            PhaseOutcome::Complete(_) => &[],
            PhaseOutcome::Degraded { reasons, .. } => reasons,
        }
    }

    pub fn into_parts(self) -> (T, Vec<String>) {
        match self {
            PhaseOutcome::Complete(value) => (value, Vec::new()),
            PhaseOutcome::Degraded { value, reasons } => (value, reasons),
        }
    }

    pub fn into_value(self) -> T {
        self.into_parts().0
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PhaseOutcome<U> {
        let (value, reasons) = self.into_parts();
        PhaseOutcome::degraded(f(value), reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_without_reasons_is_complete() {
        let outcome = PhaseOutcome::degraded(1, Vec::new());
        assert!(!outcome.is_degraded());
        assert_eq!(outcome, PhaseOutcome::Complete(1));
    }

    #[test]
    fn test_map_keeps_reasons() {
        let outcome = PhaseOutcome::degraded(2, vec!["lost a call".to_string()]).map(|v| v * 2);
        assert!(outcome.is_degraded());
        assert_eq!(*outcome.value(), 4);
        assert_eq!(outcome.reasons(), ["lost a call".to_string()]);
    }
}
