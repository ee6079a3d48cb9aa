use log::warn;
use std::future::Future;
use tokio::task::JoinSet;

/// Run every probe as its own task and wait for all of them.
///
/// Outcomes come back in completion order. A task that panics or is
/// cancelled counts as a failed probe (`None`); it never affects the others.
pub(crate) async fn run_all<T, F>(
    probes: impl IntoIterator<Item = F>,
) -> Vec<Option<T>>
where
    F: Future<Output = Option<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut tasks = JoinSet::new();
    for probe in probes {
        tasks.spawn(probe);
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                warn!("Probe task did not finish: {}", e);
                outcomes.push(None);
            }
        }
    }

    outcomes
}
