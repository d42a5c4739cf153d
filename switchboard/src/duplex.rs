//! One handle over a client and a server sharing a bus.

/// Something that releases bus resources when closed.
pub trait Closeable {
    /// Release resources without waiting on in-flight work. Idempotent.
    fn close(&self);
}

/// A client and a server built against the same bus, owned together.
///
/// Construction is atomic: if the server cannot be built, the client that
/// was already opened is closed before the error is returned.
#[derive(Debug)]
pub struct Duplex<C: Closeable, S: Closeable> {
    client: C,
    server: S,
}

impl<C: Closeable, S: Closeable> Duplex<C, S> {
    /// Build the client, then the server.
    pub fn connect<E, FC, FS>(new_client: FC, new_server: FS) -> Result<Self, E>
    where
        E: std::fmt::Display,
        FC: FnOnce() -> Result<C, E>,
        FS: FnOnce() -> Result<S, E>,
    {
        let client = new_client()?;
        match new_server() {
            Ok(server) => Ok(Self { client, server }),
            Err(err) => {
                tracing::warn!(error = %err, "duplex server construction failed, closing client");
                client.close();
                Err(err)
            }
        }
    }

    /// The client half.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The server half.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Close both halves.
    pub fn close(&self) {
        self.server.close();
        self.client.close();
    }
}

impl<C: Closeable, S: Closeable> Closeable for Duplex<C, S> {
    fn close(&self) {
        Duplex::close(self);
    }
}
