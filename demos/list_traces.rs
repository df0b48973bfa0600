use anyhow::Result;
use trace_store::StoreClient;

/// List the traces and sessions of a running trace-store as JSON
fn main() -> Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1989".to_string());

    let mut client = StoreClient::connect(addr.as_str())?;
    let version = client.version()?;
    let status = client.status()?;

    let traces = client.traces()?;
    let mut sessions = Vec::new();
    for index in 0..client.session_count()? {
        match client.session_info(index)? {
            Some(session) => sessions.push(session),
            None => break,
        }
    }

    let report = serde_json::json!({
        "version": format!("{:#06x}", version),
        "status": status,
        "traces": traces,
        "sessions": sessions,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
