/// Long-running task that consumes itself and yields a final result.
pub trait Runner {
    type Output;
    type Error;
    fn run(self) -> impl std::future::Future<Output = Result<Self::Output, Self::Error>> + Send
    where
        Self: Sized;
}
