//! Ordered fallback over interchangeable conversion strategies

use crate::error::{Attempt, PipelineError};
use std::path::Path;
use tracing::{debug, warn};

/// One way of producing a `T` from a source file.
///
/// `Ok(None)` means the strategy does not apply to this source; an error means
/// it applied and failed. Either way the chain moves on.
pub trait Strategy<T>: Send + Sync {
    fn name(&self) -> &'static str;

    fn attempt(&self, path: &Path) -> anyhow::Result<Option<T>>;
}

/// Run `strategies` in order and return the first success
pub fn run_chain<T>(path: &Path, strategies: &[Box<dyn Strategy<T>>]) -> Result<T, PipelineError> {
    let mut attempts = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        match strategy.attempt(path) {
            Ok(Some(value)) => {
                debug!(path = %path.display(), strategy = strategy.name(), "strategy succeeded");
                return Ok(value);
            }
            Ok(None) => {
                debug!(path = %path.display(), strategy = strategy.name(), "strategy not applicable");
                attempts.push(Attempt {
                    strategy: strategy.name(),
                    error: "not applicable".to_string(),
                });
            }
            Err(e) => {
                debug!(path = %path.display(), strategy = strategy.name(), error = %format!("{e:#}"), "strategy failed");
                attempts.push(Attempt {
                    strategy: strategy.name(),
                    error: format!("{e:#}"),
                });
            }
        }
    }

    warn!(path = %path.display(), attempts = attempts.len(), "all strategies exhausted");
    Err(PipelineError::Exhausted {
        path: path.to_path_buf(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Outcome {
        Succeed(u32),
        Skip,
        Fail,
    }

    struct Fixed {
        name: &'static str,
        outcome: Outcome,
        calls: Arc<AtomicUsize>,
    }

    impl Strategy<u32> for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn attempt(&self, _path: &Path) -> anyhow::Result<Option<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Succeed(value) => Ok(Some(value)),
                Outcome::Skip => Ok(None),
                Outcome::Fail => bail!("boom"),
            }
        }
    }

    fn fixed(name: &'static str, outcome: Outcome, calls: &Arc<AtomicUsize>) -> Box<dyn Strategy<u32>> {
        Box::new(Fixed {
            name,
            outcome,
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn test_first_success_stops_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            fixed("fail", Outcome::Fail, &calls),
            fixed("skip", Outcome::Skip, &calls),
            fixed("win", Outcome::Succeed(7), &calls),
            fixed("never", Outcome::Succeed(8), &calls),
        ];

        assert_eq!(run_chain(Path::new("x"), &chain).unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhaustion_lists_every_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![fixed("a", Outcome::Fail, &calls), fixed("b", Outcome::Skip, &calls)];

        match run_chain(Path::new("x"), &chain) {
            Err(PipelineError::Exhausted { attempts, .. }) => {
                let names: Vec<_> = attempts.iter().map(|a| a.strategy).collect();
                assert_eq!(names, vec!["a", "b"]);
                assert_eq!(attempts[0].error, "boom");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_chain_is_exhausted() {
        let chain: Vec<Box<dyn Strategy<u32>>> = Vec::new();
        assert!(matches!(
            run_chain(Path::new("x"), &chain),
            Err(PipelineError::Exhausted { attempts, .. }) if attempts.is_empty()
        ));
    }
}
