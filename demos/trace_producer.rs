use anyhow::Result;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use trace_store::recorder::relay::{FIELD_CONTROL_PORT, MAGIC_TRC2};

/// Simple producer that streams a synthetic trace to a running trace-store
#[tokio::main]
async fn main() -> Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1981".to_string());

    println!("Connecting to recorder at {}...", addr);
    let mut stream = TcpStream::connect(&addr).await?;

    // TRC2 header announcing a (fake) control port of 7000
    let port = 7000u16.to_le_bytes();
    let fields = [4u8, FIELD_CONTROL_PORT, port[0], port[1]];
    let mut header = MAGIC_TRC2.to_le_bytes().to_vec();
    header.extend_from_slice(&(fields.len() as u16).to_le_bytes());
    header.extend_from_slice(&fields);
    stream.write_all(&header).await?;

    println!("Streaming trace data\n");

    for i in 0..100 {
        let record = format!("trace_record_{:04}\n", i);
        stream.write_all(record.as_bytes()).await?;

        if i % 10 == 0 {
            println!("Sent {} records", i);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    stream.shutdown().await?;
    println!("\n✓ Sent 100 records");
    println!("Note: list them with the list_traces demo");

    Ok(())
}
