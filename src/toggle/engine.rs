use crate::toggle::rules::Rule;
use crate::toggle::toggler::ToggleError;

/// Outcome of one pass over the rule set.
pub struct Evaluation<'a> {
    pub matched: bool,
    /// Rules that matched, in configuration order.
    pub triggering: Vec<&'a dyn Rule>,
}

impl Evaluation<'_> {
    pub fn triggering_names(&self) -> Vec<String> {
        self.triggering.iter().map(|r| r.name()).collect()
    }
}

/// Evaluates `rules` in order and ORs the results.
///
/// Every rule is consulted even after a match so the full set of triggering
/// rules is known. The first rule that fails aborts the pass with
/// [`ToggleError::Rule`].
pub fn evaluate<R: Rule>(rules: &[R]) -> Result<Evaluation<'_>, ToggleError> {
    let mut out = Evaluation {
        matched: false,
        triggering: Vec::new(),
    };
    for rule in rules {
        let matched = rule.matches().map_err(|source| ToggleError::Rule {
            name: rule.name(),
            source,
        })?;
        if matched {
            out.matched = true;
            out.triggering.push(rule);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counted {
        name: &'static str,
        result: Result<bool, &'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl Rule for Counted {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn matches(&self) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn rule(name: &'static str, result: Result<bool, &'static str>, calls: &Arc<AtomicUsize>) -> Box<dyn Rule> {
        Box::new(Counted {
            name,
            result,
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn no_match_when_every_rule_is_false() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rules = vec![rule("a", Ok(false), &calls), rule("b", Ok(false), &calls)];
        let ev = evaluate(&rules).expect("evaluate");
        assert!(!ev.matched);
        assert!(ev.triggering.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn keeps_evaluating_after_a_match() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rules = vec![
            rule("a", Ok(true), &calls),
            rule("b", Ok(false), &calls),
            rule("c", Ok(true), &calls),
        ];
        let ev = evaluate(&rules).expect("evaluate");
        assert!(ev.matched);
        assert_eq!(ev.triggering_names(), vec!["a", "c"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn first_failure_stops_the_pass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let rules = vec![
            rule("a", Ok(true), &calls),
            rule("broken", Err("cannot read"), &calls),
            rule("c", Ok(true), &calls),
        ];
        let err = evaluate(&rules).err().expect("should fail");
        match err {
            ToggleError::Rule { name, source } => {
                assert_eq!(name, "broken");
                assert_eq!(source.to_string(), "cannot read");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_rule_set_never_matches() {
        let rules: Vec<Box<dyn Rule>> = Vec::new();
        let ev = evaluate(&rules).expect("evaluate");
        assert!(!ev.matched);
    }
}
