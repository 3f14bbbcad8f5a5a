// Torrdown core — backend process supervision and download session tracking.
//
// The desktop host owns a `Shell`, which supervises the locally-spawned
// torrent backend and exposes the `SessionManager` once the backend reports
// healthy. Rendering, search and the download mechanics themselves live
// elsewhere; this crate only speaks the backend's HTTP/websocket boundary.

pub mod backend;
pub mod config;
pub mod session;
pub mod shell;
