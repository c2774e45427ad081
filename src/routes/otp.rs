use axum::{
    routing::{delete, post},
    Router,
};

use crate::{handlers::otp, state::AppState};

pub fn otp_routes(debug_routes: bool) -> Router<AppState> {
    let router = Router::new()
        // Issue a code and email it
        .route("/issue", post(otp::issue_otp))

        // Verify a code
        .route("/verify", post(otp::verify_otp));

    if debug_routes {
        tracing::warn!("⚠️ Debug OTP cleanup route enabled at DELETE /api/otp");
        router.route("/", delete(otp::clear_otps))
    } else {
        router
    }
}
