pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::geo::handlers as locations;
use crate::risk::handlers as risk;
use crate::state::AppState;
use crate::verification::handlers as verification;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Locations
        .route("/api/v1/locations/nearby", get(locations::handle_nearby))
        .route("/api/v1/locations/city/:city", get(locations::handle_by_city))
        .route(
            "/api/v1/locations/state/:state",
            get(locations::handle_by_state),
        )
        .route(
            "/api/v1/locations/:user_id",
            get(locations::handle_get_location)
                .post(locations::handle_create_location)
                .put(locations::handle_upsert_location)
                .patch(locations::handle_update_location)
                .delete(locations::handle_delete_location),
        )
        // Verification
        .route(
            "/api/v1/verification/address/:user_id",
            post(verification::handle_initiate_address),
        )
        .route(
            "/api/v1/verification/identity/:user_id",
            post(verification::handle_initiate_identity),
        )
        .route(
            "/api/v1/verification/user/:user_id",
            get(verification::handle_list_user_jobs),
        )
        .route(
            "/api/v1/verification/jobs/:job_id",
            get(verification::handle_get_job),
        )
        // Risk
        .route("/api/v1/risk/:user_id", get(risk::handle_assess_user))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::config::Config;
    use crate::store::{MemoryJobStore, MemoryLocationStore};
    use crate::verification::FixedProvider;

    fn app_with(config: Config, provider: FixedProvider) -> Router {
        let state = AppState::new(
            config,
            Arc::new(MemoryLocationStore::new()),
            Arc::new(MemoryJobStore::new()),
            Arc::new(provider),
            "memory",
        );
        build_router(state)
    }

    fn app() -> Router {
        app_with(
            Config {
                auto_verify_on_location_write: false,
                ..Config::default()
            },
            FixedProvider::matching(),
        )
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn delhi_body() -> Value {
        json!({
            "address": "Rajpath",
            "city": "New Delhi",
            "state": "Delhi",
            "postalCode": "110001",
            "coordinates": {"latitude": 28.6139, "longitude": 77.2090},
            "source": "gps"
        })
    }

    /// Polls the job list until nothing is pending or in progress.
    async fn settled_jobs(app: &Router, user: Uuid) -> Value {
        for _ in 0..100 {
            let (_, jobs) = call(app, Method::GET, &format!("/api/v1/verification/user/{user}"), None).await;
            let busy = jobs
                .as_array()
                .unwrap()
                .iter()
                .any(|j| j["status"] == "PENDING" || j["status"] == "IN_PROGRESS");
            if !busy {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs never settled");
    }

    #[tokio::test]
    async fn test_health_reports_backends() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["storage"], "memory");
        assert_eq!(body["provider"], "fixed");
    }

    #[tokio::test]
    async fn test_location_crud() {
        let app = app();
        let user = Uuid::new_v4();
        let uri = format!("/api/v1/locations/{user}");

        let (status, _) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, Method::POST, &uri, Some(delhi_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["location"]["latitude"], 28.6139);
        assert_eq!(body["location"]["verified"], false);
        assert!(body["verificationJob"].is_null());

        let (status, body) = call(
            &app,
            Method::PATCH,
            &uri,
            Some(json!({"city": "Delhi NCR"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["location"]["city"], "Delhi NCR");

        let (status, body) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["address"], "Rajpath");

        let (status, _) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_partial_coordinates_rejected_at_boundary() {
        let app = app();
        let user = Uuid::new_v4();
        let mut body = delhi_body();
        body["coordinates"] = json!({"latitude": 28.6139});

        let (status, err) = call(&app, Method::POST, &format!("/api/v1/locations/{user}"), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_patch_without_location_is_not_found() {
        let (status, err) = call(
            &app(),
            Method::PATCH,
            &format!("/api/v1/locations/{}", Uuid::new_v4()),
            Some(json!({"city": "Pune"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_nearby_returns_ordered_hits() {
        let app = app();
        let gurgaon = json!({
            "address": "Cyber City", "city": "Gurgaon", "state": "Haryana",
            "coordinates": {"latitude": 28.4595, "longitude": 77.0266}
        });
        let noida = json!({
            "address": "Sector 18", "city": "Noida", "state": "Uttar Pradesh",
            "coordinates": {"latitude": 28.5355, "longitude": 77.3910}
        });
        for body in [gurgaon, noida] {
            let uri = format!("/api/v1/locations/{}", Uuid::new_v4());
            assert_eq!(call(&app, Method::POST, &uri, Some(body)).await.0, StatusCode::CREATED);
        }

        let (status, hits) = call(
            &app,
            Method::GET,
            "/api/v1/locations/nearby?lat=28.6139&lon=77.2090&radiusKm=30",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let cities: Vec<_> = hits
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["location"]["city"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(cities, vec!["Noida", "Gurgaon"]);

        let (status, hits) = call(
            &app,
            Method::GET,
            "/api/v1/locations/nearby?lat=28.6139&lon=77.2090&radiusKm=20",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hits.as_array().unwrap().len(), 1);

        let (status, _) = call(
            &app,
            Method::GET,
            "/api/v1/locations/nearby?lat=28.6139&lon=77.2090&radiusKm=-1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, by_state) = call(&app, Method::GET, "/api/v1/locations/state/Haryana", None).await;
        assert_eq!(by_state.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_address_verification_requires_location() {
        let (status, err) = call(
            &app(),
            Method::POST,
            &format!("/api/v1/verification/address/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_location_write_triggers_verification_and_risk() {
        let app = app_with(Config::default(), FixedProvider::matching());
        let user = Uuid::new_v4();

        let (status, body) = call(&app, Method::POST, &format!("/api/v1/locations/{user}"), Some(delhi_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["verificationJob"]["status"], "PENDING");
        assert_eq!(body["verificationJob"]["checkType"], "ADDRESS");

        let (status, job) = call(
            &app,
            Method::POST,
            &format!("/api/v1/verification/identity/{user}"),
            Some(json!({"documentType": "passport"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(job["status"], "PENDING");
        assert!(job["completedAt"].is_null());

        let jobs = settled_jobs(&app, user).await;
        let jobs = jobs.as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["checkType"], "IDENTITY");
        assert!(jobs.iter().all(|j| j["status"] == "COMPLETED" && !j["completedAt"].is_null()));

        // the verified flag is set right after the job completes
        let mut verified = false;
        for _ in 0..100 {
            let (_, location) = call(&app, Method::GET, &format!("/api/v1/locations/{user}"), None).await;
            if location["verified"] == true {
                verified = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(verified);

        let (status, risk) = call(&app, Method::GET, &format!("/api/v1/risk/{user}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            risk,
            json!({
                "userId": user,
                "overallRisk": "LOW",
                "completedChecks": 2,
                "pendingChecks": 0,
                "failedChecks": 0
            })
        );

        let job_id = job["id"].as_str().unwrap();
        let (status, fetched) = call(&app, Method::GET, &format!("/api/v1/verification/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["status"], "COMPLETED");
    }

    #[tokio::test]
    async fn test_failed_provider_makes_risk_high() {
        let app = app_with(Config::default(), FixedProvider::failing("kyc sandbox offline"));
        let user = Uuid::new_v4();

        let (status, _) = call(&app, Method::POST, &format!("/api/v1/verification/identity/{user}"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let jobs = settled_jobs(&app, user).await;
        assert_eq!(jobs[0]["status"], "FAILED");
        assert_eq!(jobs[0]["riskLevel"], "HIGH");

        let (_, risk) = call(&app, Method::GET, &format!("/api/v1/risk/{user}"), None).await;
        assert_eq!(risk["overallRisk"], "HIGH");
        assert_eq!(risk["failedChecks"], 1);
    }

    #[tokio::test]
    async fn test_identity_payload_must_be_json() {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/verification/identity/{}", Uuid::new_v4()))
            .body(Body::from("not json"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (status, _) = call(
            &app(),
            Method::GET,
            &format!("/api/v1/verification/jobs/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
