//! Loopback DNS server front-end.
//!
//! Binds UDP and TCP on the loopback interface, hands every incoming query
//! to the forwarding core and writes the outcome back: the upstream answer,
//! NXDOMAIN for blocked names, or SERVFAIL when forwarding or validation
//! failed. Clients only ever see DNS response codes, never typed errors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use hickory_server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use crate::blocklist::Snapshot;
use crate::handler::{Forwarder, Outcome};
use crate::upstream::Exchanger;

const TCP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    Proto(hickory_proto::ProtoError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "DNS server I/O error: {}", err),
            Self::Proto(err) => write!(f, "DNS server protocol error: {}", err),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<hickory_proto::ProtoError> for ServerError {
    fn from(err: hickory_proto::ProtoError) -> Self {
        Self::Proto(err)
    }
}

/// One bound server instance, ready to serve until cancelled.
pub struct Server {
    udp: UdpSocket,
    tcp: TcpListener,
    handler: ForwardHandler,
}

impl Server {
    /// Binds loopback UDP and TCP on `port`.
    pub async fn bind(
        exchanger: Arc<dyn Exchanger>,
        blocklist: Arc<Snapshot>,
        port: u16,
    ) -> std::io::Result<Self> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let udp = UdpSocket::bind(addr).await?;
        let tcp = TcpListener::bind(addr).await?;
        Ok(Self {
            udp,
            tcp,
            handler: ForwardHandler {
                forwarder: Arc::new(Forwarder::new(exchanger, blocklist)),
            },
        })
    }

    /// Address of the UDP listener.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Serves until `shutdown` fires or an unrecoverable socket error
    /// occurs. The caller learns about the exit through the return value.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        let mut server = ServerFuture::new(self.handler);
        server.register_socket(self.udp);
        server.register_listener(self.tcp, TCP_REQUEST_TIMEOUT);
        log::info!("DNS server listening on {} over UDP and TCP", addr);

        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("stopping DNS server on {}", addr);
                if let Err(err) = server.shutdown_gracefully().await {
                    log::warn!("error during graceful shutdown: {}", err);
                }
                Ok(())
            }
            result = server.block_until_done() => {
                result.map_err(ServerError::from)
            }
        }
    }
}

#[derive(Clone)]
struct ForwardHandler {
    forwarder: Arc<Forwarder>,
}

impl ForwardHandler {
    async fn handle<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handler: R,
    ) -> std::io::Result<ResponseInfo> {
        let builder = MessageResponseBuilder::from_message_request(request);

        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            log::warn!(
                "refusing request from {} with op code {} and type {:?}",
                request.src(),
                request.op_code(),
                request.message_type()
            );
            let response = builder.error_msg(request.header(), ResponseCode::Refused);
            return response_handler.send_response(response).await;
        }

        let mut query = Message::new();
        query.set_id(request.id());
        query.set_op_code(request.op_code());
        query.set_message_type(request.message_type());
        for question in request.queries() {
            query.add_query(question.original().clone());
        }

        match self.forwarder.forward(query).await {
            Ok(Outcome::Answer(upstream)) => {
                let mut header = Header::response_from_request(request.header());
                header.set_recursion_available(true);
                header.set_authoritative(false);
                header.set_response_code(upstream.response_code());

                let mut response = builder.build(
                    header,
                    upstream.answers(),
                    upstream.name_servers(),
                    &[],
                    upstream.additionals(),
                );
                if request.edns().is_some_and(|edns| edns.flags().dnssec_ok) {
                    if let Some(edns) = upstream.extensions() {
                        response.set_edns(edns.clone());
                    }
                }
                response_handler.send_response(response).await
            }
            Ok(Outcome::Blocked) => {
                let response = builder.error_msg(request.header(), ResponseCode::NXDomain);
                response_handler.send_response(response).await
            }
            Err(err) => {
                log::warn!("cannot answer query from {}: {}", request.src(), err);
                let response = builder.error_msg(request.header(), ResponseCode::ServFail);
                response_handler.send_response(response).await
            }
        }
    }
}

#[async_trait]
impl RequestHandler for ForwardHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handler: R,
    ) -> ResponseInfo {
        match self.handle(request, response_handler).await {
            Ok(info) => info,
            Err(err) => {
                log::error!("cannot send DNS response: {}", err);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    use hickory_proto::op::Query;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};

    use super::*;
    use crate::upstream::UpstreamError;

    struct MockUpstream {
        response: Option<Message>,
    }

    #[async_trait]
    impl Exchanger for MockUpstream {
        async fn exchange(&self, _query: Message) -> crate::upstream::Result<Message> {
            self.response
                .clone()
                .ok_or_else(|| UpstreamError::Dial("unreachable upstream".to_string()))
        }
    }

    fn unsigned_response(name: &Name) -> Message {
        let mut response = Message::new();
        response.set_message_type(MessageType::Response);
        response.add_answer(Record::from_rdata(
            name.clone(),
            300,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
        ));
        response
    }

    async fn start_server(
        upstream: MockUpstream,
        snapshot: Snapshot,
    ) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let server = Server::bind(Arc::new(upstream), Arc::new(snapshot), 0)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));
        (addr, token, handle)
    }

    async fn query_udp(addr: SocketAddr, name: &Name) -> Message {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(addr).await.unwrap();

        let mut query = Message::new();
        query.set_id(0x77aa);
        query.set_recursion_desired(true);
        query.add_query(Query::query(name.clone(), RecordType::A));
        socket.send(&query.to_vec().unwrap()).await.unwrap();

        let mut buffer = vec![0u8; 4096];
        let received = socket.recv(&mut buffer).await.unwrap();
        Message::from_vec(&buffer[..received]).unwrap()
    }

    #[tokio::test]
    async fn forwards_unsigned_upstream_answers() {
        let name = Name::from_str("example.test.").unwrap();
        let (addr, token, handle) = start_server(
            MockUpstream {
                response: Some(unsigned_response(&name)),
            },
            Snapshot::default(),
        )
        .await;

        let response = query_udp(addr, &name).await;
        assert_eq!(response.id(), 0x77aa);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.answers().len(), 1);
        assert_eq!(response.queries()[0].name(), &name);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn upstream_failure_becomes_servfail_with_question_echo() {
        let name = Name::from_str("example.test.").unwrap();
        let (addr, token, handle) =
            start_server(MockUpstream { response: None }, Snapshot::default()).await;

        let response = query_udp(addr, &name).await;
        assert_eq!(response.response_code(), ResponseCode::ServFail);
        assert_eq!(response.queries()[0].name(), &name);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn blocked_hostname_becomes_nxdomain() {
        let name = Name::from_str("ads.test.").unwrap();
        let snapshot = Snapshot::new(
            ["ads.test".to_string()].into_iter().collect(),
            HashSet::new(),
            HashSet::new(),
        );
        let (addr, token, handle) = start_server(
            MockUpstream {
                response: Some(unsigned_response(&name)),
            },
            snapshot,
        )
        .await;

        let response = query_udp(addr, &name).await;
        assert_eq!(response.response_code(), ResponseCode::NXDomain);

        token.cancel();
        handle.await.unwrap().unwrap();
    }
}
