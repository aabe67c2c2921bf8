//! takeout-server: HTTP delivery of signed account exports
//!
//! | Route            | Purpose                                   |
//! |------------------|-------------------------------------------|
//! | `GET /`          | Form asking for username and email        |
//! | `POST /export`   | Fetch, serialize, seal, download as zip   |
//! | `GET /publickey` | Armored public half of the signing key    |
//! | `GET /health`    | Liveness plus backend and export mode     |

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
