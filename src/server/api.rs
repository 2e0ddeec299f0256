//! REST API implementation using rouille.
//!
//! GET endpoints read shared state snapshots that the main loop refreshes
//! each tick; POST endpoints send commands over a channel that the main
//! loop drains between ticks. `file_info` embeds a response channel in its
//! command so the HTTP handler can block on the runner's answer and map a
//! missing file to 404.

use crate::media::decoder::MediaFileInfo;
use crate::script::data::{parse_script, Script};
use crate::script::runner::RunnerStatus;
use log::{error, info};
use rouille::{Request, Response};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

/// Commands sent from API handlers to the main loop.
pub enum ApiCommand {
    /// Swap in a new script (already parsed; times still raw).
    PlayScript(Script),
    /// Replace the current script with an empty one, blanking all screens.
    Stop,
    /// Shut the whole process down.
    Quit,
    /// Look up media metadata; the answer flows back over the embedded
    /// channel. The bool is true when the file was not found.
    FileInfo {
        file: String,
        response: crossbeam_channel::Sender<Result<MediaFileInfo, (bool, String)>>,
    },
}

/// State snapshots readable by API handlers, updated by the main loop.
#[derive(Default)]
pub struct SharedApiState {
    pub status: RwLock<RunnerStatus>,
}

/// Generic API response envelope.
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self { success: true, message: None, error: None }
    }

    fn ok_msg(msg: &str) -> Self {
        Self { success: true, message: Some(msg.to_string()), error: None }
    }

    fn err(msg: &str) -> Self {
        Self { success: false, message: None, error: Some(msg.to_string()) }
    }
}

/// REST API server.
pub struct ApiServer {
    port: u16,
    state: Arc<SharedApiState>,
    command_tx: crossbeam_channel::Sender<ApiCommand>,
}

impl ApiServer {
    /// Starts the server in a background thread. Returns the command
    /// receiver for the main loop to poll.
    pub fn start(
        port: u16,
        state: Arc<SharedApiState>,
    ) -> crossbeam_channel::Receiver<ApiCommand> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let server = ApiServer { port, state, command_tx: tx };
        thread::Builder::new()
            .name("api-server".to_string())
            .spawn(move || server.run())
            .expect("failed to spawn API server thread");
        rx
    }

    fn run(self) {
        let addr = format!("127.0.0.1:{}", self.port);
        let state = self.state;
        let tx = self.command_tx;

        match rouille::Server::new(&addr, move |request| {
            Self::handle_request(request, &state, &tx)
        }) {
            Ok(server) => {
                info!("API server listening on http://{}", addr);
                server.run();
            }
            Err(e) => {
                error!("Failed to start API server on port {}: {}", self.port, e);
                error!("Another instance may already be running; API disabled.");
            }
        }
    }

    fn handle_request(
        request: &Request,
        state: &Arc<SharedApiState>,
        tx: &crossbeam_channel::Sender<ApiCommand>,
    ) -> Response {
        // Media info carries the file name in the path.
        if request.method() == "GET" {
            if let Some(file) = request.url().strip_prefix("/api/media/info/") {
                return Self::handle_file_info(tx, file);
            }
        }

        rouille::router!(request,
            (GET) ["/api/health"] => {
                Response::json(&ApiResponse::ok_msg("marquee playback engine"))
            },
            (GET) ["/api/status"] => {
                let status = state.status.read().unwrap_or_else(|e| e.into_inner());
                Response::json(&*status)
            },
            (POST) ["/api/play"] => {
                Self::handle_play(request, tx)
            },
            (POST) ["/api/stop"] => {
                Self::send_command(tx, ApiCommand::Stop)
            },
            (POST) ["/api/quit"] => {
                Self::send_command(tx, ApiCommand::Quit)
            },
            _ => {
                Response::json(&ApiResponse::err("Not found")).with_status_code(404)
            }
        )
    }

    fn send_command(
        tx: &crossbeam_channel::Sender<ApiCommand>,
        cmd: ApiCommand,
    ) -> Response {
        match tx.send(cmd) {
            Ok(()) => Response::json(&ApiResponse::ok()),
            Err(e) => Response::json(&ApiResponse::err(&format!("Failed to send command: {}", e)))
                .with_status_code(500),
        }
    }

    fn handle_play(
        request: &Request,
        tx: &crossbeam_channel::Sender<ApiCommand>,
    ) -> Response {
        let mut body = String::new();
        if let Some(mut data) = request.data() {
            use std::io::Read;
            if data.read_to_string(&mut body).is_err() {
                return Response::json(&ApiResponse::err("Unreadable request body"))
                    .with_status_code(400);
            }
        }
        match parse_script(&body) {
            Ok(script) => Self::send_command(tx, ApiCommand::PlayScript(script)),
            Err(e) => Response::json(&ApiResponse::err(&format!("Invalid script: {}", e)))
                .with_status_code(400),
        }
    }

    /// Sends the lookup to the main loop and waits briefly for the answer.
    fn handle_file_info(
        tx: &crossbeam_channel::Sender<ApiCommand>,
        file: &str,
    ) -> Response {
        let (resp_tx, resp_rx) = crossbeam_channel::bounded(1);
        let cmd = ApiCommand::FileInfo { file: file.to_string(), response: resp_tx };
        if let Err(e) = tx.send(cmd) {
            return Response::json(&ApiResponse::err(&format!("Failed to send command: {}", e)))
                .with_status_code(500);
        }

        match resp_rx.recv_timeout(Duration::from_secs(15)) {
            Ok(Ok(info)) => Response::json(&info),
            Ok(Err((not_found, message))) => {
                let status = if not_found { 404 } else { 500 };
                Response::json(&ApiResponse::err(&message)).with_status_code(status)
            }
            Err(_) => Response::json(&ApiResponse::err("File info timeout")).with_status_code(504),
        }
    }
}
