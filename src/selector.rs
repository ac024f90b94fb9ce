//! Method selection and the extraction fallback chain

use crate::{
    config::ExtractionMode,
    error::{BgSwapError, ExtractionError, Result},
    extraction::{ExtractionMethod, MethodKind, MethodRegistry},
    types::{AttemptOutcome, ExtractionResult, MethodAttempt},
};
use image::{DynamicImage, GenericImageView};
use instant::{Duration, Instant};
use log::{debug, warn};
use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc},
    thread,
};
use tracing::{info as trace_info, span, Level};

/// Result of running an attempt list
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// First successful result, if any
    pub result: Option<ExtractionResult>,
    /// Every attempt in execution order
    pub attempts: Vec<MethodAttempt>,
}

impl SelectionOutcome {
    /// Errors of the failed attempts, in order
    #[must_use]
    pub fn errors(&self) -> Vec<ExtractionError> {
        self.attempts
            .iter()
            .filter_map(MethodAttempt::error)
            .cloned()
            .collect()
    }
}

/// Builds attempt lists from the extraction mode and drives the fallback chain
///
/// Availability is probed once, when the selector is created.
pub struct MethodSelector {
    registry: MethodRegistry,
    availability: BTreeMap<MethodKind, bool>,
}

impl MethodSelector {
    /// Probe every registered method and cache the results
    #[must_use]
    pub fn new(registry: MethodRegistry) -> Self {
        let _span = span!(Level::DEBUG, "probe_methods").entered();
        let availability: BTreeMap<MethodKind, bool> = registry
            .kinds()
            .into_iter()
            .filter_map(|kind| registry.get(kind).map(|method| (kind, method.probe())))
            .collect();
        debug!("Method availability: {availability:?}");
        Self {
            registry,
            availability,
        }
    }

    /// Cached probe results
    #[must_use]
    pub fn availability(&self) -> &BTreeMap<MethodKind, bool> {
        &self.availability
    }

    #[must_use]
    pub fn is_available(&self, kind: MethodKind) -> bool {
        self.availability.get(&kind).copied().unwrap_or(false)
    }

    /// Ordered list of methods to try for `mode`
    ///
    /// In auto mode the available methods run in priority order, and the
    /// corner-color method is always the final entry. A forced method runs
    /// alone.
    ///
    /// # Errors
    /// - Forced method is unavailable
    /// - No method is registered at all
    pub fn attempt_plan(&self, mode: &ExtractionMode) -> Result<Vec<MethodKind>> {
        match mode {
            ExtractionMode::Forced(kind) => {
                if self.is_available(*kind) {
                    Ok(vec![*kind])
                } else {
                    Err(BgSwapError::configuration(format!(
                        "Requested extraction method '{kind}' is not available"
                    )))
                }
            },
            ExtractionMode::Auto => {
                let mut plan: Vec<MethodKind> = MethodKind::priority_order()
                    .into_iter()
                    .filter(|kind| *kind != MethodKind::CornerColor && self.is_available(*kind))
                    .collect();
                if self.registry.get(MethodKind::CornerColor).is_some() {
                    plan.push(MethodKind::CornerColor);
                }
                if plan.is_empty() {
                    return Err(BgSwapError::configuration(
                        "No extraction methods are registered",
                    ));
                }
                Ok(plan)
            },
        }
    }

    /// Try each method in `plan` until one succeeds
    pub fn run(&self, plan: &[MethodKind], image: &Arc<DynamicImage>) -> SelectionOutcome {
        let mut attempts = Vec::with_capacity(plan.len());

        for &kind in plan {
            let _span = span!(Level::INFO, "extraction_attempt", method = %kind).entered();
            trace_info!(method = %kind, "🎯 Attempting extraction");

            let start = Instant::now();
            let result = match self.registry.get(kind) {
                Some(method) => run_method(method, image),
                None => Err(ExtractionError::new(kind, "method is not registered")),
            }
            .and_then(|result| check_dimensions(kind, result, image.dimensions()));
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(result) => {
                    debug!("{kind} succeeded in {elapsed_ms}ms");
                    attempts.push(MethodAttempt {
                        method: kind,
                        outcome: AttemptOutcome::Succeeded,
                        elapsed_ms,
                    });
                    return SelectionOutcome {
                        result: Some(result),
                        attempts,
                    };
                },
                Err(error) => {
                    warn!("⚠️ {error}");
                    attempts.push(MethodAttempt {
                        method: kind,
                        outcome: AttemptOutcome::Failed { error },
                        elapsed_ms,
                    });
                },
            }
        }

        SelectionOutcome {
            result: None,
            attempts,
        }
    }
}

impl std::fmt::Debug for MethodSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodSelector")
            .field("availability", &self.availability)
            .finish_non_exhaustive()
    }
}

/// Run one method, bounded by its timeout when it declares one
fn run_method(
    method: &Arc<dyn ExtractionMethod>,
    image: &Arc<DynamicImage>,
) -> std::result::Result<ExtractionResult, ExtractionError> {
    let kind = method.kind();
    match method.timeout() {
        None => panic::catch_unwind(AssertUnwindSafe(|| method.extract(image)))
            .unwrap_or_else(|_| Err(ExtractionError::new(kind, "method panicked"))),
        Some(timeout) => run_with_timeout(Arc::clone(method), Arc::clone(image), timeout),
    }
}

fn run_with_timeout(
    method: Arc<dyn ExtractionMethod>,
    image: Arc<DynamicImage>,
    timeout: Duration,
) -> std::result::Result<ExtractionResult, ExtractionError> {
    let kind = method.kind();
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name(format!("extract-{kind}"))
        .spawn(move || {
            // The receiver is gone once the caller timed out
            let _ = sender.send(method.extract(&image));
        })
        .map_err(|e| ExtractionError::new(kind, format!("failed to start worker: {e}")))?;

    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ExtractionError::new(
            kind,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(ExtractionError::new(kind, "worker stopped without a result"))
        },
    }
}

fn check_dimensions(
    kind: MethodKind,
    result: ExtractionResult,
    expected: (u32, u32),
) -> std::result::Result<ExtractionResult, ExtractionError> {
    let actual = result.dimensions();
    if actual == expected {
        Ok(result)
    } else {
        Err(ExtractionError::new(
            kind,
            format!(
                "malformed output dimensions {}x{}, expected {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
        ))
    }
}
