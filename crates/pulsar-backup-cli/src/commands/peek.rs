use anyhow::Result;
use pulsar_backup_core::CaptureEngine;

use super::{load_config, OutputFormat};

/// Print messages of a topic without capturing them
pub async fn run(config_path: &str, topic: &str, limit: usize, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path, None).await?;
    let engine = CaptureEngine::new(&config).await?;

    let messages = engine.peek_topic(topic, limit).await?;
    if format == OutputFormat::Text {
        println!("{} messages from {}", messages.len(), topic);
    }

    for message in &messages {
        match format {
            OutputFormat::Text => {
                println!(
                    "[{}] id={} published={} key={} properties={:?}",
                    message.sequence,
                    message.message_id,
                    message.publish_timestamp,
                    message.partition_key.as_deref().unwrap_or("-"),
                    message.properties
                );
                println!("    {}", String::from_utf8_lossy(&message.content));
            }
            OutputFormat::Json | OutputFormat::Yaml => print!("{}", message.to_json_line()?),
        }
    }
    Ok(())
}
