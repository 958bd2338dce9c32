//! OpenAPI/Utoipa configuration.

use crate::api::status::STATUS_TAG;
use utoipa::OpenApi;

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mail Healthcheck API",
        version = "1.0.0",
        description = "End-to-end health of a mail stack: login, outbound, inbound and forwarding."
    ),
    tags(
        (name = STATUS_TAG, description = "Aggregate health for automated probes")
    )
)]
pub struct ApiDoc;
