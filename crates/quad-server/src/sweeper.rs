use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use quad_db::{ChatResult, Database, SweepReport};

/// Background task that retires lapsed pending requests.
///
/// Access checks never wait on this loop; it only keeps listings and
/// counters tidy.
pub async fn run_sweep_loop(db: Arc<Database>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match sweep_once(db.clone()).await {
            Ok(report) => {
                if report.requests_expired > 0 {
                    info!("Sweep: expired {} pending requests", report.requests_expired);
                }
                debug!("Sweep: {} rooms past expiry", report.rooms_lapsed);
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

async fn sweep_once(db: Arc<Database>) -> anyhow::Result<SweepReport> {
    let report: ChatResult<SweepReport> =
        tokio::task::spawn_blocking(move || db.sweep_expired(Utc::now())).await?;
    Ok(report?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quad_types::models::{Profile, RequestStatus};
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_once_expires_lapsed_requests() {
        let db = Arc::new(Database::open_in_memory().unwrap().with_lifetimes(quad_db::Lifetimes {
            request: chrono::Duration::milliseconds(1),
            room: chrono::Duration::hours(24),
        }));
        let requester = Profile {
            user_id: Uuid::new_v4(),
            display_name: "ada".into(),
            avatar_url: None,
            campus: "north".into(),
        };
        let target = Profile {
            user_id: Uuid::new_v4(),
            ..requester.clone()
        };
        db.upsert_profile(&requester, Utc::now()).unwrap();
        db.upsert_profile(&target, Utc::now()).unwrap();
        let request = db
            .create_request(&requester, target.user_id, Uuid::new_v4(), "hi", Utc::now())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = sweep_once(db.clone()).await.unwrap();
        assert_eq!(report.requests_expired, 1);
        assert_eq!(db.get_request(request.id).unwrap().status, RequestStatus::Expired);

        let again = sweep_once(db.clone()).await.unwrap();
        assert_eq!(again.requests_expired, 0);
    }
}
