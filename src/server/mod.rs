//! REST API server for remote control of playback.
//!
//! ```text
//! ┌───────────────────────┐     crossbeam channel     ┌──────────────────┐
//! │  API server thread    │ ───── ApiCommand ───────▶ │  Main loop       │
//! │  (rouille HTTP)       │                           │  (script ticks)  │
//! │                       │   Arc<SharedApiState>     │                  │
//! │  GET /api/status      │ ◀──── status snapshots ── │  updated per tick│
//! └───────────────────────┘                           └──────────────────┘
//! ```
//!
//! | Method | Path                    | Description                       |
//! |--------|-------------------------|-----------------------------------|
//! | GET    | `/api/health`           | Liveness check                    |
//! | GET    | `/api/status`           | Screens + media playback state    |
//! | GET    | `/api/media/info/{file}`| Media metadata (404 if missing)   |
//! | POST   | `/api/play`             | Swap in a new script (JSON body)  |
//! | POST   | `/api/stop`             | Blank all screens                 |
//! | POST   | `/api/quit`             | Exit the process                  |

mod api;

pub use api::{ApiCommand, ApiServer, SharedApiState};
