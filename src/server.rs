use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::clock::age;
use crate::config::Config;
use crate::errors::StoreError;
use crate::messages::NewMessage;
use crate::presence::PresenceUpdate;
use crate::store::{StateStore, StoreStats};

const ALLOWED_HEADERS: [&str; 7] = [
    "accept",
    "accept-language",
    "authorization",
    "cache-control",
    "content-language",
    "content-type",
    "x-requested-with",
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceQuery {
    stale_after: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesQuery {
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurgeQuery {
    max_age: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: &'static str,
    users: usize,
    active_users: usize,
    messages: usize,
    last_activity: DateTime<Utc>,
    timestamp: i64,
}

impl StatusBody {
    fn new(stats: &StoreStats, now: DateTime<Utc>) -> Self {
        StatusBody {
            status: "online",
            users: stats.presence_count,
            active_users: stats.active_presence_count,
            messages: stats.message_count,
            last_activity: stats.last_activity_at,
            timestamp: now.timestamp_millis(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsBody {
    #[serde(flatten)]
    status: StatusBody,
    message_capacity: usize,
    stale_after_secs: u64,
    uptime_secs: u64,
}

/// HTTP front of the relay. Every handler makes exactly one store call.
#[derive(Clone)]
pub struct Server {
    store: Arc<StateStore>,
    purge_after: Duration,
    max_body_bytes: u64,
    started_at: DateTime<Utc>,
}

impl Server {
    pub fn new(store: Arc<StateStore>, config: &Config) -> Self {
        let started_at = store.now();
        Server {
            store,
            purge_after: config.purge_after(),
            max_body_bytes: config.max_body_bytes,
            started_at,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let server = self.clone();
        let with_server = warp::any().map(move || server.clone());
        let body_limit = warp::body::content_length_limit(self.max_body_bytes);

        let list_users = warp::path("online-users")
            .and(warp::path::end())
            .and(warp::get())
            .and(warp::query::<PresenceQuery>())
            .and(with_server.clone())
            .map(|query: PresenceQuery, server: Server| server.list_users(&query));

        let upsert_user = warp::path("online-users")
            .and(warp::path::end())
            .and(warp::post())
            .and(body_limit)
            .and(warp::body::json::<PresenceUpdate>())
            .and(with_server.clone())
            .map(|update: PresenceUpdate, server: Server| server.upsert_user(update));

        let list_messages = warp::path("chat-messages")
            .and(warp::path::end())
            .and(warp::get())
            .and(warp::query::<MessagesQuery>())
            .and(with_server.clone())
            .map(|query: MessagesQuery, server: Server| server.list_messages(&query));

        let append_message = warp::path("chat-messages")
            .and(warp::path::end())
            .and(warp::post())
            .and(body_limit)
            .and(warp::body::json::<NewMessage>())
            .and(with_server.clone())
            .map(|message: NewMessage, server: Server| server.append_message(message));

        let purge = warp::path!("maintenance" / "purge")
            .and(warp::post())
            .and(warp::query::<PurgeQuery>())
            .and(with_server.clone())
            .map(|query: PurgeQuery, server: Server| server.purge(&query));

        let status = warp::path("status")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server.clone())
            .map(|server: Server| server.status());

        let stats = warp::path("stats")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_server)
            .map(|server: Server| server.stats());

        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| "ok");

        let cors = warp::cors()
            .allow_any_origin()
            .allow_methods(vec!["GET", "POST"])
            .allow_headers(ALLOWED_HEADERS);

        list_users
            .or(upsert_user)
            .or(list_messages)
            .or(append_message)
            .or(purge)
            .or(status)
            .or(stats)
            .or(health)
            .recover(handle_rejection)
            .with(cors)
            // CORS refusals happen outside the routes and still get a JSON body.
            .recover(handle_rejection)
    }

    /// Runs the maintenance purge every `interval` until the runtime shuts down.
    pub fn spawn_purge_task(&self, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let max_age = self.purge_after;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = store.purge_presence(max_age);
                if removed > 0 {
                    info!("Purged {} idle users", removed);
                }
            }
        })
    }

    fn list_users(&self, query: &PresenceQuery) -> Response {
        let stale_after = query
            .stale_after
            .map_or(self.store.settings().stale_after, Duration::from_secs);
        let users = self.store.list_presence(stale_after);
        debug!("Sending {} online users", users.len());
        warp::reply::json(&users).into_response()
    }

    fn upsert_user(&self, update: PresenceUpdate) -> Response {
        match self.store.record_presence(update) {
            Ok((user, count)) => {
                info!(
                    "Heartbeat from {} ({}), {} users tracked",
                    user.id, user.display_name, count
                );
                json_reply(
                    &json!({ "success": true, "count": count, "user": user }),
                    StatusCode::OK,
                )
            }
            Err(e) => error_reply(&e),
        }
    }

    fn list_messages(&self, query: &MessagesQuery) -> Response {
        let limit = query
            .limit
            .and_then(|limit| usize::try_from(limit).ok())
            .unwrap_or(0);
        let messages = self.store.list_messages(limit);
        debug!("Sending {} messages", messages.len());
        warp::reply::json(&messages).into_response()
    }

    fn append_message(&self, message: NewMessage) -> Response {
        match self.store.append_message(message) {
            Ok((message, total)) => {
                info!(
                    "Message {} from {} ({}), {} stored",
                    message.id, message.sender_name, message.kind, total
                );
                json_reply(
                    &json!({ "success": true, "message": message, "total": total }),
                    StatusCode::OK,
                )
            }
            Err(e) => error_reply(&e),
        }
    }

    fn purge(&self, query: &PurgeQuery) -> Response {
        let max_age = query.max_age.map_or(self.purge_after, Duration::from_secs);
        let removed = self.store.purge_presence(max_age);
        info!("Manual purge removed {} users", removed);
        json_reply(&json!({ "success": true, "removed": removed }), StatusCode::OK)
    }

    fn status(&self) -> Response {
        let stats = self.store.snapshot_stats();
        json_reply(&StatusBody::new(&stats, self.store.now()), StatusCode::OK)
    }

    fn stats(&self) -> Response {
        let stats = self.store.snapshot_stats();
        let now = self.store.now();
        let settings = self.store.settings();
        let body = StatsBody {
            status: StatusBody::new(&stats, now),
            message_capacity: settings.message_capacity,
            stale_after_secs: settings.stale_after.as_secs(),
            uptime_secs: age(now, self.started_at).as_secs(),
        };
        json_reply(&body, StatusCode::OK)
    }
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn failure(status: StatusCode, message: &str) -> Response {
    json_reply(&json!({ "success": false, "error": message }), status)
}

fn error_reply(err: &StoreError) -> Response {
    let status = match err {
        StoreError::Validation { .. } => StatusCode::BAD_REQUEST,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    warn!("Rejected request: {}", err);
    failure(status, &err.to_string())
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "invalid query string".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "content-length required".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected application/json".to_string(),
        )
    } else if let Some(e) = err.find::<warp::filters::cors::CorsForbidden>() {
        (StatusCode::FORBIDDEN, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        warn!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
        )
    };

    Ok(failure(status, &message))
}
