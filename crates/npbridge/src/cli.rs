//! The `inspect` and `run` commands.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use npbridge_core::host::NullPluginManager;
use npbridge_core::kernel::Result;
use npbridge_core::plugin_system::{
    DeliveryOutcome, InstanceMode, PluginValue, PluginVariable, PostData, StreamDelivery, StreamError, StreamId,
    UrlResponder, WindowGeometry,
};
use npbridge_core::{
    BridgeConfig, BrowserServices, HostServiceError, InstanceConfig, InterfaceId, LegacyPlugin, NPReason, Plugin,
    PluginFactory,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::host::{mime_for, FileHost, HostRequest};

/// One entry of a module's `type:extensions:description;...` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeEntry {
    pub mime_type: String,
    pub extensions: String,
    pub description: String,
}

pub fn parse_mime_description(description: &str) -> Vec<MimeEntry> {
    description
        .split(';')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let mut fields = entry.splitn(3, ':');
            let mut next = || fields.next().unwrap_or("").trim().to_string();
            MimeEntry {
                mime_type: next(),
                extensions: next(),
                description: next(),
            }
        })
        .collect()
}

fn string_value(plugin: &LegacyPlugin, variable: PluginVariable) -> Option<String> {
    match plugin.get_value(variable) {
        Ok(PluginValue::String(value)) => Some(value),
        Ok(PluginValue::Bool(_)) => None,
        Err(e) => {
            info!("Module does not answer {:?}: {}", variable, e);
            None
        }
    }
}

/// Load `module`, print what it declares and shut it down again.
pub fn inspect(module: &Path, config: BridgeConfig) -> Result<()> {
    let services = BrowserServices::new(Arc::new(NullPluginManager)).with_config(config);
    let plugin = LegacyPlugin::load(module, &services)?;

    println!("Module: {}", module.display());
    if let Some(name) = string_value(&plugin, PluginVariable::NameString) {
        println!("Name: {}", name);
    }
    if let Some(description) = string_value(&plugin, PluginVariable::DescriptionString) {
        println!("Description: {}", description);
    }
    println!("Table version: {}", plugin.table_version());
    println!("MIME types:");
    for entry in parse_mime_description(&plugin.mime_description()?) {
        println!("  {} ({}): {}", entry.mime_type, entry.extensions, entry.description);
    }

    plugin.shutdown()?;
    Ok(())
}

/// Options of the `run` command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub module: PathBuf,
    pub mime_type: Option<String>,
    pub mode: InstanceMode,
    pub attributes: Vec<(String, String)>,
    pub file: Option<PathBuf>,
    pub window: Option<(u32, u32)>,
    pub base: PathBuf,
    pub max_requests: usize,
}

/// Start one session of `options.module`, feed it content and serve what it
/// asks for until it goes quiet.
pub async fn run(options: RunOptions, config: BridgeConfig) -> Result<()> {
    let (host, mut requests) = FileHost::new(options.base.clone());
    let services = BrowserServices::new(Arc::new(host)).with_config(config);
    let plugin = LegacyPlugin::load(&options.module, &services)?;

    let mime_type = match options.mime_type.clone() {
        Some(mime_type) => mime_type,
        None => parse_mime_description(&plugin.mime_description()?)
            .into_iter()
            .next()
            .map(|entry| entry.mime_type)
            .ok_or("Module declares no MIME types; pass --type")?,
    };

    let session = plugin.create_instance(&InterfaceId::PLUGIN_INSTANCE)?;
    let instance = options
        .attributes
        .iter()
        .fold(InstanceConfig::new(&mime_type).with_mode(options.mode), |built, (name, value)| {
            built.attribute(name, value)
        });
    session.start(instance)?;
    println!("Session {} started for {}", session.id(), mime_type);

    if let Some((width, height)) = options.window {
        session.set_window(&WindowGeometry {
            width,
            height,
            ..Default::default()
        })?;
    }

    let mut seeking = Vec::new();
    let mut served = serve_requests(&mut requests, &mut seeking, options.max_requests).await;

    if let Some(file) = &options.file {
        let data = tokio::fs::read(file).await.map_err(HostServiceError::from)?;
        let url = format!("file://{}", absolute(file).display());
        let delivery = StreamDelivery::new(url, mime_for(file), data);
        match session.deliver_stream(delivery)? {
            DeliveryOutcome::Finished(reason) => println!("Delivered {} ({:?})", file.display(), reason),
            DeliveryOutcome::AwaitingReads(id) => println!("Delivered {} (stream {} open for reads)", file.display(), id),
        }
        served += serve_requests(&mut requests, &mut seeking, options.max_requests.saturating_sub(served)).await;
    }

    if served >= options.max_requests {
        warn!("Stopped serving after {} requests", served);
    }
    finish_seeking(seeking);
    // Anything still queued is abandoned; the module hears NPRES_USER_BREAK on destroy.
    let saved = session.destroy()?;
    requests.close();
    println!(
        "Session destroyed{}",
        saved.map(|s| format!(" (saved {} bytes)", s.0.len())).unwrap_or_default()
    );

    plugin.shutdown()?;
    println!("Module shut down");
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A fetch whose stream the module took in `NP_SEEK` mode. The request is
/// completed only once its stream has been closed.
type SeekingFetch = (UrlResponder, StreamId);

/// Serve queued requests, including those queued while serving, up to `limit`.
async fn serve_requests(
    requests: &mut UnboundedReceiver<HostRequest>,
    seeking: &mut Vec<SeekingFetch>,
    limit: usize,
) -> usize {
    let mut served = 0;
    while served < limit {
        let Ok(request) = requests.try_recv() else {
            break;
        };
        match request {
            HostRequest::Fetch { request, path } => {
                let target = request.target().map(str::to_string);
                let responder = request.into_responder();
                match target {
                    Some(target) => {
                        println!("[navigate] {} -> '{}'", responder.url(), target);
                        responder.complete(NPReason::DONE);
                    }
                    None => {
                        if let Some(open) = serve_file(responder, &path).await {
                            seeking.push(open);
                        }
                    }
                }
            }
            HostRequest::Post { request, data } => {
                let size = match &data {
                    PostData::Buffer(bytes) => format!("{} bytes", bytes.len()),
                    PostData::File(path) => format!("file {}", path.display()),
                };
                println!("[post] {} <- {}", request.url(), size);
                request.into_responder().complete(NPReason::DONE);
            }
        }
        served += 1;
    }
    served
}

/// Deliver `path` for `responder`. Returns the responder instead of
/// completing it when the stream stays open for range reads.
async fn serve_file(responder: UrlResponder, path: &Path) -> Option<SeekingFetch> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Cannot serve {}: {}", path.display(), e);
            responder.complete(NPReason::NETWORK_ERR);
            return None;
        }
    };
    let reason = match responder.deliver(mime_for(path), data) {
        Ok(DeliveryOutcome::Finished(reason)) => reason,
        Ok(DeliveryOutcome::AwaitingReads(id)) => {
            info!("Stream {} of {} stays open for reads", id, path.display());
            return Some((responder, id));
        }
        Err(e) => {
            warn!("Delivery of {} failed: {}", path.display(), e);
            NPReason::NETWORK_ERR
        }
    };
    responder.complete(reason);
    None
}

/// Close the streams of seeking fetches, then complete their requests, so
/// each notification follows its stream's end.
fn finish_seeking(seeking: Vec<SeekingFetch>) {
    for (responder, id) in seeking {
        let reason = match responder.end_stream(id, NPReason::DONE) {
            // The module closed it already.
            Ok(()) | Err(StreamError::UnknownStream(_)) => NPReason::DONE,
            Err(e) => {
                warn!("Closing stream {} of {} failed: {}", id, responder.url(), e);
                NPReason::NETWORK_ERR
            }
        };
        responder.complete(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mime_description() {
        let entries = parse_mime_description("application/x-hello:hello:Hello module;text/x-demo:dm,demo:Demo;");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].mime_type, "application/x-hello");
        assert_eq!(entries[0].extensions, "hello");
        assert_eq!(entries[0].description, "Hello module");
        assert_eq!(entries[1].extensions, "dm,demo");
    }

    #[test]
    fn test_parse_mime_description_partial_entries() {
        let entries = parse_mime_description("application/x-bare");
        assert_eq!(
            entries,
            vec![MimeEntry {
                mime_type: "application/x-bare".to_string(),
                extensions: String::new(),
                description: String::new(),
            }]
        );
        assert!(parse_mime_description("").is_empty());
    }
}
