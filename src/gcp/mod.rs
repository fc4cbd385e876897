//! GCP API interaction module
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client for making API requests
//! - [`http`] - HTTP utilities for REST API calls and the [`http::ApiError`] type
//! - [`container`] - Kubernetes Engine wire types and the [`container::ContainerApi`] trait
//!
//! # Example
//!
//! ```ignore
//! use gkepool::gcp::client::GcpClient;
//! use gkepool::gcp::container::ContainerApi;
//!
//! async fn example(id: &gkepool::nodepool::NodePoolId) -> anyhow::Result<()> {
//!     let client = GcpClient::new().await?;
//!     let pool = client.get_node_pool(id).await?;
//!     println!("{:?}", pool.status);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod container;
pub mod http;
