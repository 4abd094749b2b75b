use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::web::Data;
use actix_web::{App, test};
use httpmock::prelude::*;
use serde_json::{Value, json};

use pims_prp::auth::password::hash_password;
use pims_prp::config::{Config, PrpConfig};
use pims_prp::model::role::Role;
use pims_prp::model::user::User;
use pims_prp::models::LoginResponse;
use pims_prp::prp::PrpClient;
use pims_prp::routes;
use pims_prp::store::{MemoryUserStore, UserStore};
use pims_prp::sync::SyncService;

const SECURE_PATH: &str = "/api/secure/external";

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

fn config(server: &MockServer) -> Config {
    let mut prp = PrpConfig::for_base_url(server.base_url());
    prp.max_retries = 0;
    prp.retry_backoff = Duration::from_millis(1);

    Config {
        database_url: String::new(),
        jwt_secret: "test-secret".to_string(),
        server_addr: "127.0.0.1:0".to_string(),
        access_token_ttl: 900,
        log_dir: "logs".to_string(),
        rate_login_per_min: 600,
        rate_protected_per_min: 600,
        api_prefix: "/api".to_string(),
        prp,
    }
}

fn mock_portal(server: &MockServer) {
    server.mock(|when, then| {
        when.method(POST).path("/api/authentication/external");
        then.status(200)
            .json_body(json!({"responseCode": 200, "payload": "tok"}));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path(SECURE_PATH)
            .query_param("action", "departments");
        then.status(200).json_body(json!({
            "responseCode": 200,
            "payload": [{"id": 1, "nameEng": "IT Wing", "isWing": true}]
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path(SECURE_PATH)
            .query_param("action", "employee_details")
            .query_param("departmentId", "1");
        then.status(200).json_body(json!({
            "responseCode": 200,
            "payload": [{"userId": "110", "nameEng": "Jane Doe", "status": "active"}]
        }));
    });
}

async fn seed_account(store: &MemoryUserStore, username: &str, role: Role) {
    store
        .insert(User {
            id: 0,
            username: username.to_string(),
            password: hash_password("secret").unwrap(),
            role_id: role as u8,
            employee_id: None,
            first_name: username.to_string(),
            last_name: String::new(),
            email: None,
            designation: None,
            office: None,
            phone: None,
            photo: None,
            is_active: true,
            is_active_employee: true,
            is_prp_managed: false,
            prp_last_sync: None,
        })
        .await;
}

macro_rules! app {
    ($server:expr, $store:expr) => {{
        let config = config($server);
        let client = Arc::new(PrpClient::new(config.prp.clone()).unwrap());
        let store: Arc<dyn UserStore> = $store.clone();
        let service = Data::new(SyncService::new(client, store.clone()));
        let route_config = config.clone();
        test::init_service(
            App::new()
                .app_data(Data::<dyn UserStore>::from(store))
                .app_data(service)
                .app_data(Data::new(config))
                .configure(move |cfg| routes::configure(cfg, route_config.clone())),
        )
        .await
    }};
}

macro_rules! login {
    ($app:expr, $username:expr, $password:expr) => {{
        let req = test::TestRequest::post()
            .uri("/auth/login")
            .peer_addr(peer())
            .set_json(json!({"username": $username, "password": $password}))
            .to_request();
        let resp = test::call_service($app, req).await;
        let status = resp.status();
        if status.is_success() {
            let body: LoginResponse = test::read_body_json(resp).await;
            (status, Some(body.access_token))
        } else {
            (status, None)
        }
    }};
}

#[actix_web::test]
async fn admin_triggers_full_sync() {
    let server = MockServer::start();
    mock_portal(&server);
    let store = Arc::new(MemoryUserStore::new());
    seed_account(&store, "admin", Role::Admin).await;
    let app = app!(&server, store);

    let (status, token) = login!(&app, "admin", "secret");
    assert_eq!(status, StatusCode::OK);
    let token = token.unwrap();

    let req = test::TestRequest::post()
        .uri("/api/prp/sync")
        .peer_addr(peer())
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["created"], 1);
    assert_eq!(body["errors"], 0);
    assert_eq!(body["dry_run"], false);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("PRP sync finished: 1 created")
    );
    assert_eq!(store.users().await.len(), 2);
}

#[actix_web::test]
async fn dry_run_flag_is_honoured() {
    let server = MockServer::start();
    mock_portal(&server);
    let store = Arc::new(MemoryUserStore::new());
    seed_account(&store, "admin", Role::Admin).await;
    let app = app!(&server, store);

    let (_, token) = login!(&app, "admin", "secret");
    let req = test::TestRequest::post()
        .uri("/api/prp/sync/department/1")
        .peer_addr(peer())
        .insert_header(("Authorization", format!("Bearer {}", token.unwrap())))
        .set_json(json!({"dry_run": true}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["created"], 1);
    assert_eq!(body["dry_run"], true);
    assert_eq!(store.users().await.len(), 1);
}

#[actix_web::test]
async fn unknown_employee_is_not_found() {
    let server = MockServer::start();
    mock_portal(&server);
    let store = Arc::new(MemoryUserStore::new());
    seed_account(&store, "admin", Role::Admin).await;
    let app = app!(&server, store);

    let (_, token) = login!(&app, "admin", "secret");
    let req = test::TestRequest::post()
        .uri("/api/prp/sync/user/999?department_id=1")
        .peer_addr(peer())
        .insert_header(("Authorization", format!("Bearer {}", token.unwrap())))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn sync_requires_token_and_role() {
    let server = MockServer::start();
    mock_portal(&server);
    let store = Arc::new(MemoryUserStore::new());
    seed_account(&store, "clerk", Role::Employee).await;
    let app = app!(&server, store);

    let req = test::TestRequest::post()
        .uri("/api/prp/sync")
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let (_, token) = login!(&app, "clerk", "secret");
    let req = test::TestRequest::post()
        .uri("/api/prp/sync")
        .peer_addr(peer())
        .insert_header(("Authorization", format!("Bearer {}", token.unwrap())))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(store.users().await.len(), 1);
}

#[actix_web::test]
async fn login_rejects_bad_credentials() {
    let server = MockServer::start();
    let store = Arc::new(MemoryUserStore::new());
    seed_account(&store, "admin", Role::Admin).await;
    let app = app!(&server, store);

    let (status, _) = login!(&app, "admin", "wrong");
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = login!(&app, "nobody", "secret");
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn status_reports_portal_connectivity() {
    let server = MockServer::start();
    mock_portal(&server);
    let store = Arc::new(MemoryUserStore::new());
    seed_account(&store, "admin", Role::Admin).await;
    let app = app!(&server, store);

    let (_, token) = login!(&app, "admin", "secret");
    let req = test::TestRequest::get()
        .uri("/api/prp/status")
        .peer_addr(peer())
        .insert_header(("Authorization", format!("Bearer {}", token.unwrap())))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["connected"], true);
    assert_eq!(body["report"]["department_count"], 1);
}
