/// Connectable transport client.
///
/// Implementations consume the unconnected client and return it with a live
/// connection, so a connected client is distinguishable by construction.
pub trait Client {
    type Error;
    fn connect(self) -> impl std::future::Future<Output = Result<Self, Self::Error>> + Send
    where
        Self: Sized;
}
