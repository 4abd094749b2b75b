use crate::api::prp::{SyncRequest, SyncResponse};
use crate::models::{LoginReqDto, LoginResponse};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PIMS PRP Sync API",
        version = "1.0.0",
        description = r#"
## PIMS user synchronization with the Parliament Resource Portal

Employees are mastered in the **Parliament Resource Portal (PRP)**. These
endpoints pull departments and employees from PRP and create or update the
matching local user accounts.

### 🔹 Operations
- **Full sync** of every department
- **Department sync** for one PRP department
- **Single-user sync** by PRP `userId`
- **Status** check of PRP connectivity and credentials

### 🔐 Security
All PRP endpoints require a **JWT Bearer** access token from `/auth/login`.
Sync endpoints are restricted to **Admin** and **System** roles.

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::auth::handlers::login,

        crate::api::prp::sync_all,
        crate::api::prp::sync_department,
        crate::api::prp::sync_user,
        crate::api::prp::status
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            SyncRequest,
            SyncResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Local authentication"),
        (name = "PRP", description = "Parliament Resource Portal synchronization"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
