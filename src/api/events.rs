//! Server-Sent Events stream of task notifications.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use super::handlers::AppState;
use crate::domain::{Requester, TaskEvent};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Streams notifications for tasks the requester may see.
///
/// Each event is named after its kind (`task_created`, `task_updated`,
/// `task_deleted`) and carries the JSON notification as data. A subscriber
/// that falls behind skips the missed events and keeps streaming.
pub async fn task_events(
    State(state): State<AppState>,
    requester: Requester,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(user_id = %requester.user_id, "Event stream opened");
    let receiver = state.publisher.subscribe();
    Sse::new(visible_events(receiver, requester))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

fn visible_events(
    receiver: broadcast::Receiver<TaskEvent>,
    requester: Requester,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(
        (receiver, requester),
        |(mut receiver, requester)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if requester.can_access(&event.owner_id) => {
                        let sse = to_sse(&event);
                        return Some((Ok(sse), (receiver, requester)));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    )
}

fn to_sse(event: &TaskEvent) -> Event {
    let sse = Event::default().event(event.kind.event_name());
    match sse.clone().json_data(event) {
        Ok(with_data) => with_data,
        Err(error) => {
            tracing::error!(error = %error, "Failed to encode task event");
            sse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, OwnerId, Task, TaskEventKind, TaskId, Timestamp};
    use futures::StreamExt;
    use rstest::rstest;

    fn event_for(owner: OwnerId) -> TaskEvent {
        let task = Task::create(TaskId::generate(), owner, NewTask::titled("x"), Timestamp::now());
        TaskEvent::for_task(TaskEventKind::Created, &task)
    }

    #[rstest]
    #[tokio::test]
    async fn test_stream_skips_foreign_events() {
        let (sender, receiver) = broadcast::channel(8);
        let owner = OwnerId::generate();
        let stream = visible_events(receiver, Requester::user(owner));

        sender.send(event_for(OwnerId::generate())).unwrap();
        sender.send(event_for(owner)).unwrap();
        drop(sender);

        let delivered: Vec<_> = stream.collect().await;
        assert_eq!(delivered.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_admin_stream_sees_everything() {
        let (sender, receiver) = broadcast::channel(8);
        let stream = visible_events(receiver, Requester::admin(OwnerId::generate()));

        sender.send(event_for(OwnerId::generate())).unwrap();
        sender.send(event_for(OwnerId::generate())).unwrap();
        drop(sender);

        let delivered: Vec<_> = stream.collect().await;
        assert_eq!(delivered.len(), 2);
    }
}
