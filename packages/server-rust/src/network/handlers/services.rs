//! `GET /services`: the registered workers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceView {
    pub name: String,
    pub queue: String,
    pub url: String,
    pub audience: String,
    pub deadline_s: u32,
}

/// Lists every registered worker, sorted by name.
pub async fn services_handler(State(state): State<AppState>) -> Json<Vec<ServiceView>> {
    let views = state
        .dispatcher
        .registry()
        .descriptors()
        .into_iter()
        .map(|d| ServiceView {
            name: d.name().to_string(),
            queue: d.queue_name().to_string(),
            url: d.destination_url().to_string(),
            audience: d.audience().to_string(),
            deadline_s: d.dispatch_deadline_secs(),
        })
        .collect();
    Json(views)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::dispatch::InMemoryTaskQueue;
    use crate::network::handlers::tests::test_state;

    #[tokio::test]
    async fn lists_workers_sorted() {
        let Json(views) = services_handler(State(test_state(Arc::new(InMemoryTaskQueue::new())))).await;

        assert_eq!(
            serde_json::to_value(&views).unwrap(),
            json!([
                {
                    "name": "brain",
                    "queue": "queue-brain",
                    "url": "https://brain-x-uc.a.run.app/process",
                    "audience": "https://brain-x-uc.a.run.app",
                    "deadline_s": 700
                },
                {
                    "name": "testimonios",
                    "queue": "queue-testimonios",
                    "url": "https://testimonios-x-uc.a.run.app/generate-testimony",
                    "audience": "https://testimonios-x-uc.a.run.app",
                    "deadline_s": 900
                }
            ])
        );
    }
}
