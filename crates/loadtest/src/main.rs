//! Concurrent `/status` load against a running mail-healthcheck daemon.
//!
//! Many near-simultaneous requests each trigger a check run; only one may
//! actually execute at a time, so the daemon must stay responsive and never
//! answer with anything but `UP`, `DOWN` or `DOWN - stale data`.
//!
//! Run with e.g. `loadtest --host http://127.0.0.1:3000 --users 50 --run-time 1m`.

use goose::prelude::*;

const KNOWN_BODIES: [&str; 3] = ["UP", "DOWN", "DOWN - stale data"];

async fn get_status(user: &mut GooseUser) -> TransactionResult {
    let mut goose = user.get("/status").await?;

    let Ok(response) = goose.response else {
        return Ok(());
    };
    let status = response.status().as_u16();
    match response.text().await {
        Ok(body) if (status == 200 || status == 418) && KNOWN_BODIES.contains(&body.as_str()) => {
            // 418 is the daemon's stale answer, not a failure of the endpoint
            if status == 418 {
                user.set_success(&mut goose.request)?;
            }
        }
        Ok(body) => {
            return user.set_failure(
                &format!("unexpected answer {status}: {body}"),
                &mut goose.request,
                None,
                None,
            );
        }
        Err(e) => {
            return user.set_failure(
                &format!("unreadable body: {e}"),
                &mut goose.request,
                None,
                None,
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(scenario!("Status").register_transaction(transaction!(get_status)))
        .execute()
        .await?;

    Ok(())
}
