use crate::{
    api::prp,
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default();
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = build_limiter(config.rate_login_per_min);
    let protected_limiter = build_limiter(config.rate_protected_per_min);

    // Public routes
    cfg.service(
        web::scope("/auth").service(
            web::resource("/login")
                .wrap(login_limiter)
                .route(web::post().to(handlers::login)),
        ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::scope("/prp")
                    // /prp/status
                    .service(web::resource("/status").route(web::get().to(prp::status)))
                    // /prp/sync
                    .service(web::resource("/sync").route(web::post().to(prp::sync_all)))
                    // /prp/sync/department/{id}
                    .service(
                        web::resource("/sync/department/{id}")
                            .route(web::post().to(prp::sync_department)),
                    )
                    // /prp/sync/user/{employee_id}
                    .service(
                        web::resource("/sync/user/{employee_id}")
                            .route(web::post().to(prp::sync_user)),
                    ),
            ),
    );
}

// LOGIN
//  └─ access_token (15 min)

// ADMIN ACTION
//  └─ Authorization: Bearer access_token
//       └─ POST /api/prp/sync ...
