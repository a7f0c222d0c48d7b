use super::{TaskHandle, TaskId};
use crate::error::{Error, Result};
use crate::sync::MultipleWaiter;
use crate::time::with_timeout;

use std::time::Duration;

/// Waits for a group of tasks to finish.
///
/// Returns the ids of the finished tasks, in completion order for the
/// tasks that were still running. Waiting stops once `count` tasks
/// finished (all of them with `None`) or when `timeout` elapsed, in which
/// case the tasks finished so far are returned.
///
/// # Errors
///
/// Fails if the waiting task is killed.
///
/// # Examples
///
/// ```rust,ignore
/// let a = hubcore::spawn(async { Ok(1) })?;
/// let b = hubcore::spawn(async { Ok(2) })?;
/// let done = hubcore::joinall(&[a, b], None, None).await?;
/// assert_eq!(done.len(), 2);
/// ```
pub async fn joinall<T: 'static>(
    handles: &[TaskHandle<T>],
    timeout: Option<Duration>,
    count: Option<usize>,
) -> Result<Vec<TaskId>> {
    let wanted = count.unwrap_or(handles.len()).min(handles.len());
    let mut done: Vec<TaskId> = handles
        .iter()
        .filter(|h| h.is_ready())
        .map(|h| h.id())
        .collect();

    if done.len() >= wanted {
        return Ok(done);
    }

    let finished = MultipleWaiter::new();
    for handle in handles.iter().filter(|h| !h.is_ready()) {
        let finished = finished.clone();
        let id = handle.id();
        handle.link(move || finished.switch(id));
    }

    let collect = async {
        while done.len() < wanted {
            done.push(finished.get().await?);
        }
        Ok::<(), Error>(())
    };

    let outcome = match timeout {
        Some(timeout) => with_timeout(timeout, collect).await,
        None => collect.await,
    };

    match outcome {
        Ok(()) | Err(Error::Timeout) => Ok(done),
        Err(err) => Err(err),
    }
}

/// Kills every task of `handles` with `error`, then waits until they all
/// finished or `timeout` elapsed.
///
/// Returns `true` if every task finished in time.
pub async fn killall<T: 'static>(
    handles: &[TaskHandle<T>],
    error: Error,
    timeout: Option<Duration>,
) -> Result<bool> {
    for handle in handles {
        handle.kill(error.clone());
    }

    let done = joinall(handles, timeout, None).await?;
    Ok(done.len() == handles.len())
}
