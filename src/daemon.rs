//! WebSocket server exposing the document store.
//!
//! One JSON message per text frame, see [`crate::protocol`]. Requests on a
//! connection are handled in order; replies echo the request id.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use colored::Colorize;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
    WebSocketStream,
};

use crate::protocol::{ClientMessage, ServerMessage, StoreError};
use crate::rate_limit::RateLimiter;
use crate::store::DocumentStore;

pub const DEFAULT_PORT: u16 = 9850;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Daemon shared state
pub struct DaemonState {
    pub store: Arc<DocumentStore>,
    pub rate_limiters: HashMap<SocketAddr, RateLimiter>,
}

impl DaemonState {
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store: Arc::new(store),
            rate_limiters: HashMap::new(),
        }
    }
}

pub type SharedState = Arc<RwLock<DaemonState>>;

/// Serve `store` until Ctrl+C or SIGTERM.
pub async fn run(store: DocumentStore, bind: IpAddr, port: u16) -> std::io::Result<()> {
    let root = store.config().root.clone();
    if let Err(e) = store.health() {
        tracing::warn!("{}; requests will fail until it exists", e);
    }

    let listener = TcpListener::bind(SocketAddr::new(bind, port)).await?;
    let port = listener.local_addr()?.port();
    let state: SharedState = Arc::new(RwLock::new(DaemonState::new(store)));
    tracing::info!("Document store WebSocket server on {}:{}", bind, port);

    print_banner(&root, bind, port);

    #[cfg(unix)]
    run_server_loop_unix(listener, state).await;

    #[cfg(not(unix))]
    run_server_loop_ctrlc_only(listener, state).await;

    Ok(())
}

fn print_banner(root: &std::path::Path, bind: IpAddr, port: u16) {
    let host = if bind.is_unspecified() {
        local_ip_address::local_ip().unwrap_or(bind)
    } else {
        bind
    };
    println!();
    println!("  {} {}", "●".green(), "docshelf is serving".bold());
    println!("  {} {}", "Root:".dimmed(), root.display());
    println!(
        "  {} {}",
        "Connect to:".dimmed(),
        format!("ws://{}:{}", host, port).green()
    );
    println!();
}

/// Server loop with Unix signal handling (SIGTERM + Ctrl+C)
#[cfg(unix)]
async fn run_server_loop_unix(listener: TcpListener, state: SharedState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(
                "Failed to set up SIGTERM handler: {:?}. Only Ctrl+C will work for shutdown.",
                e
            );
            run_server_loop_ctrlc_only(listener, state).await;
            return;
        }
    };

    loop {
        tokio::select! {
            result = listener.accept() => {
                if let Ok((stream, addr)) = result {
                    tokio::spawn(serve_connection(stream, addr, state.clone()));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Daemon shutting down (Ctrl+C)");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Daemon shutting down (SIGTERM)");
                break;
            }
        }
    }
}

/// Server loop with Ctrl+C only (fallback or non-Unix)
async fn run_server_loop_ctrlc_only(listener: TcpListener, state: SharedState) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                if let Ok((stream, addr)) = result {
                    tokio::spawn(serve_connection(stream, addr, state.clone()));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Daemon shutting down (Ctrl+C)");
                break;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, addr: SocketAddr, state: SharedState) {
    if let Err(e) = handle_connection(stream, addr, state.clone()).await {
        tracing::debug!("Connection {} ended with error: {}", addr, e);
    }
    state.write().await.rate_limiters.remove(&addr);
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SharedState,
) -> Result<(), BoxError> {
    // Uploads arrive base64-encoded; leave headroom above the 50MB file cap.
    let ws_config = WebSocketConfig {
        max_message_size: Some(96 * 1024 * 1024),
        max_frame_size: Some(96 * 1024 * 1024),
        ..Default::default()
    };
    let ws = accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut tx, mut rx) = ws.split();
    tracing::info!("Client connected: {}", addr);

    let welcome = {
        let st = state.read().await;
        ServerMessage::Welcome {
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            root: st.store.config().root.display().to_string(),
        }
    };
    send(&mut tx, &welcome).await?;

    while let Some(frame) = rx.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => process_client_msg(msg, &state, &mut tx, addr).await?,
                Err(e) => {
                    tracing::debug!("Ignoring unparsable client message from {}: {}", addr, e);
                }
            },
            Message::Ping(data) => {
                let _ = tx.send(Message::Pong(data)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::info!("Client disconnected: {}", addr);
    Ok(())
}

async fn process_client_msg(
    msg: ClientMessage,
    state: &SharedState,
    tx: &mut WsSink,
    addr: SocketAddr,
) -> Result<(), BoxError> {
    let Some(request_id) = msg.request_id().map(str::to_string) else {
        return send(tx, &ServerMessage::Pong).await;
    };
    let operation = msg.operation();

    if let Err(e) = check_rate_limit(state, addr).await {
        return send_store_error(tx, request_id, operation, e).await;
    }

    let store = { state.read().await.store.clone() };
    tracing::debug!("{} {} from {}", operation, request_id, addr);
    match dispatch(&store, msg).await {
        Ok(reply) => send(tx, &reply).await,
        Err(e) => {
            tracing::debug!("{} {} failed: {}", operation, request_id, e);
            send_store_error(tx, request_id, operation, e).await
        }
    }
}

/// Run one request against the store and build its reply.
async fn dispatch(store: &DocumentStore, msg: ClientMessage) -> Result<ServerMessage, StoreError> {
    let reply = match msg {
        ClientMessage::Ping => ServerMessage::Pong,
        ClientMessage::Health { request_id } => ServerMessage::Health {
            request_id,
            report: store.health()?,
        },

        ClientMessage::ListRoot { request_id } => ServerMessage::Items {
            request_id,
            items: store.tree().list_root().await?,
        },
        ClientMessage::Browse {
            request_id,
            item_id,
        } => ServerMessage::Items {
            request_id,
            items: store.tree().list(&item_id).await?,
        },
        ClientMessage::GetItem {
            request_id,
            item_id,
        } => ServerMessage::Item {
            request_id,
            item: store.tree().get(&item_id).await?,
        },
        ClientMessage::GetTree {
            request_id,
            max_depth,
        } => ServerMessage::Tree {
            request_id,
            tree: store.tree().build_tree(max_depth).await?,
        },
        ClientMessage::GetStats { request_id } => ServerMessage::Stats {
            request_id,
            stats: store.tree().stats().await?,
        },
        ClientMessage::Search {
            request_id,
            query,
            item_type,
            extension,
        } => ServerMessage::Items {
            request_id,
            items: store
                .tree()
                .search(&query, item_type.as_deref(), extension.as_deref())
                .await?,
        },

        ClientMessage::CreateRoot { request_id, name } => ServerMessage::Item {
            request_id,
            item: store.mutations().create_root(&name).await?,
        },
        ClientMessage::CreateChild {
            request_id,
            parent_id,
            name,
        } => ServerMessage::Item {
            request_id,
            item: store.mutations().create(&parent_id, &name).await?,
        },
        ClientMessage::Rename {
            request_id,
            item_id,
            new_name,
        } => ServerMessage::Item {
            request_id,
            item: store.mutations().rename(&item_id, &new_name).await?,
        },
        ClientMessage::MoveItem {
            request_id,
            item_id,
            destination_id,
        } => ServerMessage::Item {
            request_id,
            item: store.mutations().move_item(&item_id, &destination_id).await?,
        },
        ClientMessage::Delete {
            request_id,
            item_id,
        } => ServerMessage::Deleted {
            request_id,
            path: store.mutations().delete(&item_id).await?,
        },
        ClientMessage::Upload {
            request_id,
            parent_id,
            file_name,
            content_base64,
        } => {
            let bytes = BASE64
                .decode(content_base64.as_bytes())
                .map_err(|e| StoreError::invalid_argument(format!("invalid base64: {e}")))?;
            ServerMessage::Item {
                request_id,
                item: store.mutations().upload(&parent_id, &file_name, &bytes).await?,
            }
        }
        ClientMessage::UploadMultiple {
            request_id,
            parent_id,
            files,
        } => {
            let files: Vec<(String, String)> = files
                .into_iter()
                .map(|f| (f.file_name, f.content_base64))
                .collect();
            ServerMessage::Items {
                request_id,
                items: store.mutations().upload_many(&parent_id, &files).await?,
            }
        }
        ClientMessage::Download {
            request_id,
            item_id,
        } => ServerMessage::FileContent {
            request_id,
            content: store.read_document(&item_id, false).await?,
        },
        ClientMessage::Preview {
            request_id,
            item_id,
        } => ServerMessage::FileContent {
            request_id,
            content: store.read_document(&item_id, true).await?,
        },

        ClientMessage::ListTags { request_id } => ServerMessage::Tags {
            request_id,
            tags: store.tags().list_tags().await,
        },
        ClientMessage::CreateTag {
            request_id,
            name,
            color,
        } => ServerMessage::Tag {
            request_id,
            tag: store.tags().create_tag(&name, color.as_deref()).await?,
        },
        ClientMessage::DeleteTag { request_id, name } => {
            store.tags().delete_tag(&name).await?;
            ServerMessage::OperationSuccess {
                request_id,
                operation: "delete_tag".to_string(),
                message: Some(format!("tag {name} deleted")),
            }
        }
        ClientMessage::GetItemTags {
            request_id,
            item_id,
        } => {
            let tags = store.tags().item_tags(&item_id).await?;
            ServerMessage::ItemTags {
                request_id,
                item_id,
                tags,
            }
        }
        ClientMessage::SetItemTags {
            request_id,
            item_id,
            tags,
        } => {
            let tags = store.tags().set_item_tags(&item_id, tags).await?;
            ServerMessage::ItemTags {
                request_id,
                item_id,
                tags,
            }
        }
        ClientMessage::AddItemTag {
            request_id,
            item_id,
            tag,
        } => {
            let tags = store.tags().add_item_tag(&item_id, &tag).await?;
            ServerMessage::ItemTags {
                request_id,
                item_id,
                tags,
            }
        }
        ClientMessage::RemoveItemTag {
            request_id,
            item_id,
            tag,
        } => {
            let tags = store.tags().remove_item_tag(&item_id, &tag).await?;
            ServerMessage::ItemTags {
                request_id,
                item_id,
                tags,
            }
        }
        ClientMessage::ItemsByTag { request_id, name } => ServerMessage::Items {
            request_id,
            items: store.tags().items_by_tag(&name).await?,
        },

        ClientMessage::ListFavorites { request_id } => ServerMessage::Favorites {
            request_id,
            favorites: store.tags().list_favorites().await?,
        },
        ClientMessage::AddFavorite {
            request_id,
            item_id,
        } => ServerMessage::Favorites {
            request_id,
            favorites: store.tags().add_favorite(&item_id).await?,
        },
        ClientMessage::RemoveFavorite {
            request_id,
            item_id,
        } => ServerMessage::Favorites {
            request_id,
            favorites: store.tags().remove_favorite(&item_id).await?,
        },
    };
    Ok(reply)
}

async fn check_rate_limit(state: &SharedState, addr: SocketAddr) -> Result<(), StoreError> {
    let mut st = state.write().await;
    st.rate_limiters.entry(addr).or_default().check()
}

async fn send(tx: &mut WsSink, msg: &ServerMessage) -> Result<(), BoxError> {
    tx.send(Message::Text(serde_json::to_string(msg)?)).await?;
    Ok(())
}

async fn send_store_error(
    tx: &mut WsSink,
    request_id: String,
    operation: &str,
    error: StoreError,
) -> Result<(), BoxError> {
    let msg = ServerMessage::OperationError {
        request_id,
        operation: operation.to_string(),
        kind: error.kind(),
        error,
    };
    send(tx, &msg).await
}
