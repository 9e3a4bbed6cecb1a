use std::marker::PhantomData;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::ready;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use orion::aead::streaming::{StreamOpener, StreamSealer};
use orion::kdf::SecretKey;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::common::error::error;
use crate::common::serverdir::AccessRecord;
use crate::transfer::auth::{do_authentication, open_message, seal_message, serialize};
use crate::transfer::messages::{FromClientMessage, ToClientMessage};
use crate::transfer::transport::make_protocol_builder;

type Codec = Framed<TcpStream, LengthDelimitedCodec>;

const COMM_PROTOCOL: u32 = 0;

/// Typed, authenticated, encrypted connection between a client and the
/// server.
pub struct PoolConnection<ReceiveMsg, SendMsg> {
    writer: SplitSink<Codec, Bytes>,
    reader: SplitStream<Codec>,
    sealer: StreamSealer,
    opener: StreamOpener,
    _r: PhantomData<ReceiveMsg>,
    _s: PhantomData<SendMsg>,
}

impl<R: DeserializeOwned, S: Serialize> PoolConnection<R, S> {
    pub async fn send(&mut self, item: S) -> crate::Result<()> {
        let data = serialize(&item)?;
        self.writer
            .send(seal_message(&mut self.sealer, data.into()))
            .await?;
        Ok(())
    }

    pub async fn receive(&mut self) -> Option<crate::Result<R>> {
        self.reader.next().await.map(|msg| {
            let message = msg.map_err(crate::Error::from)?;
            open_message(&mut self.opener, &message)
        })
    }

    pub async fn send_and_receive(&mut self, item: S) -> crate::Result<R> {
        self.send(item).await?;
        match self.receive().await {
            Some(msg) => msg,
            None => error("Expected response was not received".into()),
        }
    }

    pub fn split(
        self,
    ) -> (
        impl Sink<S, Error = crate::Error>,
        impl Stream<Item = crate::Result<R>>,
    ) {
        let PoolConnection {
            reader,
            writer,
            mut sealer,
            mut opener,
            ..
        } = self;

        let sink = writer.with(move |msg| {
            ready(serialize(&msg).map(|data| seal_message(&mut sealer, data.into())))
        });

        let stream = reader.map(move |message| {
            let message: BytesMut = message.map_err(crate::Error::from)?;
            open_message(&mut opener, &message)
        });

        (sink, stream)
    }

    async fn init(socket: TcpStream, server: bool, key: Arc<SecretKey>) -> crate::Result<Self> {
        let connection = make_protocol_builder().new_framed(socket);
        let (mut tx, mut rx) = connection.split();

        let mut my_role = "lp-server";
        let mut peer_role = "lp-client";
        if !server {
            std::mem::swap(&mut my_role, &mut peer_role);
        }

        let (sealer, opener) =
            do_authentication(COMM_PROTOCOL, my_role, peer_role, key, &mut tx, &mut rx).await?;

        Ok(Self {
            writer: tx,
            reader: rx,
            sealer,
            opener,
            _r: Default::default(),
            _s: Default::default(),
        })
    }
}

pub type ClientConnection = PoolConnection<ToClientMessage, FromClientMessage>;
pub type ServerConnection = PoolConnection<FromClientMessage, ToClientMessage>;

pub struct ClientSession {
    connection: ClientConnection,
}

/// Client -> server connection
impl ClientSession {
    pub async fn connect_to_server(record: &AccessRecord) -> crate::Result<ClientSession> {
        let address = format!("{}:{}", record.host(), record.port());
        let connection = TcpStream::connect(&address).await?;
        let key = record.secret_key().clone();
        Ok(ClientSession {
            connection: PoolConnection::init(connection, false, key).await?,
        })
    }

    pub fn connection(&mut self) -> &mut ClientConnection {
        &mut self.connection
    }
}

/// Server -> client connection
impl ServerConnection {
    pub async fn accept_client(
        socket: TcpStream,
        key: Arc<SecretKey>,
    ) -> crate::Result<ServerConnection> {
        PoolConnection::init(socket, true, key).await
    }
}
