//! Fetch jobs run inside the orchestrators' workers.
//!
//! Each job is a thin adapter from [`FetchJob`] to one [`SimrailClient`]
//! call. The client already turns upstream failures into empty results, so
//! the jobs never fail.

use std::sync::Arc;

use crate::core::FetchJob;
use crate::source::{ServerDescriptor, ServerTime, SimrailClient, Station, Train};

/// Global server list.
pub struct ServersJob {
    client: Arc<SimrailClient>,
}

impl ServersJob {
    pub fn new(client: Arc<SimrailClient>) -> Self {
        Self { client }
    }
}

impl FetchJob for ServersJob {
    type Request = ();
    type Output = Vec<ServerDescriptor>;

    async fn run(&self, _request: ()) -> Self::Output {
        self.client.fetch_servers().await
    }
}

/// Trains of one server.
pub struct TrainsJob {
    client: Arc<SimrailClient>,
}

impl TrainsJob {
    pub fn new(client: Arc<SimrailClient>) -> Self {
        Self { client }
    }
}

impl FetchJob for TrainsJob {
    type Request = String;
    type Output = Vec<Train>;

    async fn run(&self, server_code: String) -> Self::Output {
        self.client.fetch_trains(&server_code).await
    }
}

/// Stations of one server.
pub struct StationsJob {
    client: Arc<SimrailClient>,
}

impl StationsJob {
    pub fn new(client: Arc<SimrailClient>) -> Self {
        Self { client }
    }
}

impl FetchJob for StationsJob {
    type Request = String;
    type Output = Vec<Station>;

    async fn run(&self, server_code: String) -> Self::Output {
        self.client.fetch_stations(&server_code).await
    }
}

/// Clock and timezone of one server, sampled together.
pub struct ServerTimeJob {
    client: Arc<SimrailClient>,
}

impl ServerTimeJob {
    pub fn new(client: Arc<SimrailClient>) -> Self {
        Self { client }
    }
}

impl FetchJob for ServerTimeJob {
    type Request = String;
    type Output = Option<ServerTime>;

    async fn run(&self, server_code: String) -> Self::Output {
        self.client.refresh_server_time(&server_code).await
    }
}
