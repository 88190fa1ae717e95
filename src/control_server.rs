use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::router::RoutingCoordinator;
use crate::types::{AreaId, NodeId};

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: String,
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SendArgs {
    dest: NodeId,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AddNeighborArgs {
    name: NodeId,
    ip: String,
    port: u16,
    distance: u32,
    #[serde(default)]
    areas: Vec<AreaId>,
}

#[derive(Debug, Deserialize)]
struct RemoveNeighborArgs {
    name: NodeId,
    #[serde(default = "default_send_bye")]
    send_bye: bool,
}

fn default_send_bye() -> bool {
    true
}

impl ControlResponse {
    fn ok(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    fn with_json<T: Serialize>(message: impl Into<String>, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self::ok(message, Some(data)),
            Err(e) => Self::fail(format!("Failed to serialize response: {}", e)),
        }
    }
}

/// Line-delimited JSON command channel over TCP on the loopback interface.
pub struct ControlServer {
    port: u16,
    coordinator: Arc<RoutingCoordinator>,
}

impl ControlServer {
    pub fn new(port: u16, coordinator: Arc<RoutingCoordinator>) -> Self {
        Self { port, coordinator }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let bind_addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Control server listening on {}", bind_addr);
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Control connection from {}", addr);
                    let coordinator = self.coordinator.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_client(stream, coordinator).await {
                            error!("Error handling control client {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept control connection: {}", e);
                }
            }
        }
    }

    async fn handle_client(
        mut stream: TcpStream,
        coordinator: Arc<RoutingCoordinator>,
    ) -> anyhow::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            if buf_reader.read_line(&mut line).await? == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<ControlCommand>(trimmed) {
                Ok(command) => Self::process_command(command, &coordinator).await,
                Err(e) => ControlResponse::fail(format!("Invalid JSON command: {}", e)),
            };

            let response_json = serde_json::to_string(&response)?;
            writer
                .write_all(format!("{}\n", response_json).as_bytes())
                .await?;
            writer.flush().await?;
        }

        Ok(())
    }

    pub async fn process_command(
        command: ControlCommand,
        coordinator: &RoutingCoordinator,
    ) -> ControlResponse {
        match command.command.as_str() {
            "status" => {
                ControlResponse::with_json("Status retrieved", &coordinator.status().await)
            }
            "neighbors" => {
                let neighbors = coordinator.neighbor_snapshot().await;
                ControlResponse::with_json(format!("Found {} neighbors", neighbors.len()), &neighbors)
            }
            "routes" => {
                let table = coordinator.routing_table().await;
                let routes: Vec<_> = table.iter().cloned().collect();
                ControlResponse::with_json(format!("Retrieved {} routes", routes.len()), &routes)
            }
            "areas" => {
                ControlResponse::with_json("Area state retrieved", &coordinator.area_status().await)
            }
            "send" => Self::send(command.args, coordinator).await,
            "add_neighbor" => Self::add_neighbor(command.args, coordinator).await,
            "remove_neighbor" => Self::remove_neighbor(command.args, coordinator).await,
            "recalculate" => {
                coordinator.recalculate().await;
                ControlResponse::ok("Routing tables recalculated", None)
            }
            "help" => Self::get_help(),
            _ => ControlResponse::fail(format!("Unknown command: {}", command.command)),
        }
    }

    fn parse_args<T: for<'de> Deserialize<'de>>(
        args: Option<serde_json::Value>,
    ) -> Result<T, ControlResponse> {
        let args = args.ok_or_else(|| ControlResponse::fail("Missing args"))?;
        serde_json::from_value(args)
            .map_err(|e| ControlResponse::fail(format!("Invalid args: {}", e)))
    }

    async fn send(
        args: Option<serde_json::Value>,
        coordinator: &RoutingCoordinator,
    ) -> ControlResponse {
        let args: SendArgs = match Self::parse_args(args) {
            Ok(args) => args,
            Err(response) => return response,
        };
        match coordinator.send_data(args.dest, args.message.as_bytes()).await {
            Ok(outcome) => ControlResponse::ok(format!("{:?}", outcome), None),
            Err(e) => {
                warn!("send to {} failed: {}", args.dest, e);
                ControlResponse::fail(e.to_string())
            }
        }
    }

    async fn add_neighbor(
        args: Option<serde_json::Value>,
        coordinator: &RoutingCoordinator,
    ) -> ControlResponse {
        let args: AddNeighborArgs = match Self::parse_args(args) {
            Ok(args) => args,
            Err(response) => return response,
        };
        let areas: BTreeSet<AreaId> = if args.areas.is_empty() {
            coordinator.served_areas().iter().copied().collect()
        } else {
            args.areas.into_iter().collect()
        };
        match coordinator
            .add_neighbor(args.name, &args.ip, args.port, args.distance, areas)
            .await
        {
            Ok(true) => ControlResponse::ok(format!("Neighbor {} added", args.name), None),
            Ok(false) => ControlResponse::ok(format!("Neighbor {} replaced", args.name), None),
            Err(e) => ControlResponse::fail(e.to_string()),
        }
    }

    async fn remove_neighbor(
        args: Option<serde_json::Value>,
        coordinator: &RoutingCoordinator,
    ) -> ControlResponse {
        let args: RemoveNeighborArgs = match Self::parse_args(args) {
            Ok(args) => args,
            Err(response) => return response,
        };
        match coordinator.remove_neighbor(args.name, args.send_bye).await {
            Ok(()) => ControlResponse::ok(format!("Neighbor {} removed", args.name), None),
            Err(e) => ControlResponse::fail(e.to_string()),
        }
    }

    fn get_help() -> ControlResponse {
        let commands = vec![
            ("status", "Node status and counters"),
            ("neighbors", "Neighbor table"),
            ("routes", "Routing table"),
            ("areas", "Per-area advertisements and tables"),
            ("send", "Send DATA (args: dest, message)"),
            ("add_neighbor", "Add a neighbor (args: name, ip, port, distance, areas)"),
            ("remove_neighbor", "Remove a neighbor (args: name, send_bye)"),
            ("recalculate", "Recompute and re-announce every area"),
            ("help", "Show this help message"),
        ];
        ControlResponse::with_json("Available commands", &commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use serde_json::json;

    async fn coordinator() -> Arc<RoutingCoordinator> {
        let config = RouterConfig::new(
            NodeId::new('A').unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        );
        RoutingCoordinator::bind(&config).await.unwrap()
    }

    fn command(name: &str, args: Option<serde_json::Value>) -> ControlCommand {
        ControlCommand {
            command: name.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let c = coordinator().await;
        let response = ControlServer::process_command(command("reboot", None), &c).await;
        assert!(!response.success);
        assert!(response.message.contains("reboot"));
    }

    #[tokio::test]
    async fn test_add_and_remove_neighbor() {
        let c = coordinator().await;
        let args = json!({"name": "B", "ip": "127.0.0.1", "port": 40301, "distance": 1});
        let response = ControlServer::process_command(command("add_neighbor", Some(args)), &c).await;
        assert!(response.success, "{}", response.message);

        let response = ControlServer::process_command(command("neighbors", None), &c).await;
        let data = response.data.unwrap();
        assert_eq!(data[0]["name"], "B");
        assert_eq!(data[0]["areas"], json!(["0"]));

        let args = json!({"name": "B", "send_bye": false});
        let response =
            ControlServer::process_command(command("remove_neighbor", Some(args)), &c).await;
        assert!(response.success);
        assert!(c.neighbors().is_empty().await);
    }

    #[tokio::test]
    async fn test_send_requires_args_and_route() {
        let c = coordinator().await;
        let response = ControlServer::process_command(command("send", None), &c).await;
        assert!(!response.success);

        let args = json!({"dest": "Z", "message": "hi"});
        let response = ControlServer::process_command(command("send", Some(args)), &c).await;
        assert!(!response.success);
        assert!(response.message.contains("no route"));
    }

    #[tokio::test]
    async fn test_status_and_help() {
        let c = coordinator().await;
        let response = ControlServer::process_command(command("status", None), &c).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap()["name"], "A");

        let response = ControlServer::process_command(command("help", None), &c).await;
        assert_eq!(response.data.unwrap().as_array().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_json_lines_over_tcp() {
        let c = coordinator().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ControlServer::new(0, c);
        let task = tokio::spawn(async move { server.serve(listener).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"{\"command\": \"routes\"}\n").await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: ControlResponse = serde_json::from_str(&line).unwrap();
        assert!(response.success);
        task.abort();
    }
}
