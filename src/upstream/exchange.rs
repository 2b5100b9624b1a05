//! Wire-level DNS exchange over an established upstream connection.

use hickory_proto::op::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_rustls::client::TlsStream;

/// Largest datagram the forwarder advertises through EDNS0.
pub const MAX_UDP_PAYLOAD: usize = 4096;

/// One upstream connection, either the TLS channel or the UDP fallback.
pub enum Connection {
    Tls(Box<TlsStream<TcpStream>>),
    Udp(UdpSocket),
}

impl Connection {
    /// Sends one query and reads one response.
    pub async fn exchange(&mut self, query: &Message) -> super::Result<Message> {
        match self {
            Self::Tls(stream) => exchange_framed(stream.as_mut(), query).await,
            Self::Udp(socket) => exchange_datagram(socket, query).await,
        }
    }
}

/// DNS over TCP framing: a two byte big endian length prefix on both the
/// query and the response (RFC 1035 section 4.2.2).
pub(crate) async fn exchange_framed<S>(stream: &mut S, query: &Message) -> super::Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let wire = query.to_vec()?;
    let length = (wire.len() as u16).to_be_bytes();
    stream.write_all(&length).await?;
    stream.write_all(&wire).await?;
    stream.flush().await?;

    let mut length = [0u8; 2];
    stream.read_exact(&mut length).await?;
    let mut body = vec![0u8; u16::from_be_bytes(length) as usize];
    stream.read_exact(&mut body).await?;
    Ok(Message::from_vec(&body)?)
}

async fn exchange_datagram(socket: &UdpSocket, query: &Message) -> super::Result<Message> {
    let wire = query.to_vec()?;
    socket.send(&wire).await?;
    let mut body = vec![0u8; MAX_UDP_PAYLOAD];
    let received = socket.recv(&mut body).await?;
    Ok(Message::from_vec(&body[..received])?)
}

#[cfg(test)]
mod tests {
    use hickory_proto::op::{Message, MessageType, Query};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    use super::*;

    fn query(name: &str) -> Message {
        let mut message = Message::new();
        message.set_id(0x2b1a);
        message.add_query(Query::query(
            Name::from_str(name).unwrap(),
            RecordType::A,
        ));
        message
    }

    #[tokio::test]
    async fn framed_exchange_round_trips() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let upstream = tokio::spawn(async move {
            let mut length = [0u8; 2];
            server.read_exact(&mut length).await.unwrap();
            let mut body = vec![0u8; u16::from_be_bytes(length) as usize];
            server.read_exact(&mut body).await.unwrap();

            let mut response = Message::from_vec(&body).unwrap();
            response.set_message_type(MessageType::Response);
            let wire = response.to_vec().unwrap();
            server
                .write_all(&(wire.len() as u16).to_be_bytes())
                .await
                .unwrap();
            server.write_all(&wire).await.unwrap();
        });

        let response = exchange_framed(&mut client, &query("example.com."))
            .await
            .unwrap();
        upstream.await.unwrap();

        assert_eq!(response.id(), 0x2b1a);
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(
            response.queries()[0].name(),
            &Name::from_str("example.com.").unwrap()
        );
    }

    #[tokio::test]
    async fn short_framed_response_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let mut length = [0u8; 2];
            server.read_exact(&mut length).await.unwrap();
            let mut body = vec![0u8; u16::from_be_bytes(length) as usize];
            server.read_exact(&mut body).await.unwrap();
            // Announce more bytes than are sent, then hang up.
            server.write_all(&100u16.to_be_bytes()).await.unwrap();
            server.write_all(&[0u8; 3]).await.unwrap();
        });

        let result = exchange_framed(&mut client, &query("example.com.")).await;
        assert!(result.is_err());
    }
}
