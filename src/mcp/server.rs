//! MCP server implementation using pmcp.
//!
//! Exposes the aggregator tools over stdio or streamable HTTP.

use crate::aggregator::Aggregator;
use crate::mcp::tools::ToolRegistry;
use async_trait::async_trait;
use pmcp::{
    server::streamable_http_server::StreamableHttpServer, Error, RequestHandlerExtra, Server,
    ServerCapabilities, ToolHandler, ToolInfo,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Server name reported during MCP initialization
pub const SERVER_NAME: &str = "research-aggregator";

/// The MCP server
#[derive(Debug, Clone)]
pub struct McpServer {
    server: Arc<Mutex<Server>>,
    tool_names: Vec<String>,
}

impl McpServer {
    /// Create a new MCP server backed by `aggregator`
    pub fn new(aggregator: Arc<Aggregator>) -> Result<Self, pmcp::Error> {
        let tools = ToolRegistry::from_aggregator(aggregator);
        let tool_names = tools.all().iter().map(|t| t.name.clone()).collect();
        let server = Self::build_server(&tools)?;
        Ok(Self {
            server: Arc::new(Mutex::new(server)),
            tool_names,
        })
    }

    /// Names of the exposed tools
    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    fn build_server(tools: &ToolRegistry) -> Result<Server, pmcp::Error> {
        let mut builder = Server::builder()
            .name(SERVER_NAME)
            .version(env!("CARGO_PKG_VERSION"))
            .capabilities(ServerCapabilities::default());

        for tool in tools.all() {
            let wrapper = ToolWrapper {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                input_schema: tool.input_schema.clone(),
                handler: tool.handler.clone(),
            };
            builder = builder.tool(tool.name.clone(), wrapper);
        }

        builder.build()
    }

    /// Run the server over stdio until the client disconnects
    pub async fn run(self) -> Result<(), pmcp::Error> {
        tracing::info!(
            "Starting MCP server in stdio mode with {} tools",
            self.tool_names.len()
        );

        let server = Arc::try_unwrap(self.server)
            .map_err(|_| Error::internal("MCP server is shared by another transport"))?
            .into_inner();

        server.run_stdio().await
    }

    /// Start the streamable HTTP transport on `addr`
    pub async fn run_http(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>), pmcp::Error> {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::invalid_params(format!("Invalid address '{}': {}", addr, e)))?;

        tracing::info!("Starting MCP server in HTTP mode on {}", socket_addr);
        StreamableHttpServer::new(socket_addr, self.server.clone())
            .start()
            .await
    }
}

/// Adapts a registry [`crate::mcp::Tool`] to pmcp's handler trait
#[derive(Clone)]
struct ToolWrapper {
    name: String,
    description: Option<String>,
    input_schema: Value,
    handler: Arc<dyn crate::mcp::tools::ToolHandler>,
}

#[async_trait]
impl ToolHandler for ToolWrapper {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> Result<Value, Error> {
        let started = Instant::now();
        let result = self.handler.execute(args).await;
        match &result {
            Ok(_) => tracing::debug!(
                tool = %self.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool call succeeded"
            ),
            Err(e) => tracing::warn!(tool = %self.name, error = %e, "tool call failed"),
        }
        result.map_err(|e| Error::internal(&e))
    }

    fn metadata(&self) -> Option<ToolInfo> {
        Some(ToolInfo::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        ))
    }
}
