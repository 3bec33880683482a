use std::time::Duration;

use clap::Parser;
use log::{error, info};

use rtp_forwarder::config::{
    IceServerConfig, DEFAULT_AUDIO_PAYLOAD_TYPE, DEFAULT_AUDIO_PORT, DEFAULT_VIDEO_PAYLOAD_TYPE,
    DEFAULT_VIDEO_PORT,
};
use rtp_forwarder::{
    ConfigError, ForwarderConfig, ForwarderSession, MediaEngine, RouteTable, SignalingChannel,
    WebRtcEngine,
};

/// Forward a pixel streaming session's RTP to local UDP ports.
#[derive(Parser, Debug)]
#[command(name = "rtp-forwarder", version)]
struct Args {
    /// Signaling server host
    #[arg(long, default_value = "localhost")]
    signaling_host: String,

    /// Signaling server port
    #[arg(long, default_value_t = 80)]
    signaling_port: u16,

    /// Signaling websocket path
    #[arg(long, default_value = "/")]
    signaling_path: String,

    /// Address the RTP is forwarded to
    #[arg(long, default_value = "127.0.0.1")]
    dest_addr: String,

    #[arg(long, default_value_t = DEFAULT_AUDIO_PORT)]
    audio_port: u16,

    #[arg(long, default_value_t = DEFAULT_VIDEO_PORT)]
    video_port: u16,

    /// Payload type written into forwarded audio packets
    #[arg(long, default_value_t = DEFAULT_AUDIO_PAYLOAD_TYPE)]
    audio_payload_type: u8,

    /// Payload type written into forwarded video packets
    #[arg(long, default_value_t = DEFAULT_VIDEO_PAYLOAD_TYPE)]
    video_payload_type: u8,

    /// Picture loss indication period in milliseconds
    #[arg(long, default_value_t = 2000)]
    keepalive_ms: u64,

    /// STUN server URL, may be repeated
    #[arg(long = "stun")]
    stun: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<ForwarderConfig, ConfigError> {
        let config = ForwarderConfig {
            signaling_url: ForwarderConfig::signaling_url(
                &self.signaling_host,
                self.signaling_port,
                &self.signaling_path,
            )?,
            routes: ForwarderConfig::default_routes(
                &self.dest_addr,
                (self.audio_port, self.audio_payload_type),
                (self.video_port, self.video_payload_type),
            )?,
            keepalive_interval: Duration::from_millis(self.keepalive_ms),
            ice_servers: self.stun.iter().map(|url| IceServerConfig::stun(url)).collect(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;

    let routes = RouteTable::open(&config.routes)?;
    let (engine, events) = WebRtcEngine::new(&config.ice_servers).await?;

    info!("Connecting to signaling server {}", config.signaling_url);
    let channel = match SignalingChannel::connect(&config.signaling_url).await {
        Ok(channel) => channel,
        Err(e) => {
            if let Err(close_err) = engine.close().await {
                error!("{}", close_err);
            }
            return Err(e.into());
        }
    };

    let session = ForwarderSession::new(
        engine,
        events,
        routes,
        config.keepalive_interval,
        channel.outbound(),
    );

    // A failed offer is not retried; remote messages are still handled.
    if let Err(e) = session.start().await {
        error!("Failed to start negotiation: {}", e);
    }

    let negotiator = session.negotiator().clone();
    tokio::select! {
        result = channel.run(&negotiator) => match result {
            Ok(()) => info!("Signaling connection closed"),
            Err(e) => error!("Signaling loop ended: {}", e),
        },
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    session.shutdown().await?;
    info!("Stopped");
    Ok(())
}
