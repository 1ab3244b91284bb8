use bytes::Bytes;
use futures::future::BoxFuture;

use crate::core::command::{self, Cmd, KeyType};
use crate::core::Client;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Anything that can run a command and hand back its reply.
///
/// [`Client`] is the session-backed implementation. Other backends (a
/// recording fake in tests, a proxy) implement this one method and get
/// the whole [`Commands`] surface for free.
pub trait Executor: Send {
    /// Runs one command. Error replies come back as
    /// [`Error::Server`](crate::Error::Server).
    fn execute(&mut self, cmd: Cmd) -> BoxFuture<'_, Result<Frame>>;
}

impl Executor for Client {
    fn execute(&mut self, cmd: Cmd) -> BoxFuture<'_, Result<Frame>> {
        Box::pin(Client::execute(self, cmd))
    }
}

/// Typed wrappers over [`Executor::execute`].
///
/// # Example
///
/// ```no_run
/// use respite::{Client, Commands};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut client = Client::connect("redis://127.0.0.1:6379").await?;
/// client.set("counter", "10").await?;
/// assert_eq!(client.incr("counter").await?, 11);
/// # Ok(())
/// # }
/// ```
pub trait Commands: Executor {
    /// Sends PING. Returns the status text, normally `PONG`.
    fn ping(&mut self) -> BoxFuture<'_, Result<String>> {
        let cmd = command::ping();
        Box::pin(async move { command::frame_to_string(self.execute(cmd).await?) })
    }

    /// Echoes the provided message back from the server.
    fn echo(&mut self, msg: impl Into<Bytes>) -> BoxFuture<'_, Result<Bytes>> {
        let cmd = command::echo(msg);
        Box::pin(async move {
            let bytes = command::frame_to_bytes(self.execute(cmd).await?)?;
            Ok(bytes.unwrap_or_default())
        })
    }

    /// Gets the value of a key.
    ///
    /// # Returns
    ///
    /// `None` if the key does not exist. An empty value is `Some` and empty.
    fn get(&mut self, key: impl Into<Bytes>) -> BoxFuture<'_, Result<Option<Bytes>>> {
        let cmd = command::get(key);
        Box::pin(async move { command::frame_to_bytes(self.execute(cmd).await?) })
    }

    /// Sets the value of a key.
    fn set(
        &mut self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> BoxFuture<'_, Result<()>> {
        let cmd = command::set(key, value);
        Box::pin(async move {
            self.execute(cmd).await?;
            Ok(())
        })
    }

    /// Sets the value of a key with an expiration time.
    fn set_with_expiry(
        &mut self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        expiry: std::time::Duration,
    ) -> BoxFuture<'_, Result<()>> {
        let cmd = command::set_with_expiry(key, value, expiry);
        Box::pin(async move {
            self.execute(cmd).await?;
            Ok(())
        })
    }

    /// Gets the values of several keys. Missing keys are `None`.
    fn mget<I, K>(&mut self, keys: I) -> BoxFuture<'_, Result<Vec<Option<Bytes>>>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        let cmd = command::mget(keys);
        Box::pin(async move {
            command::frame_to_vec_bytes(self.execute(cmd).await?)?
                .ok_or_else(|| Error::protocol("nil array in reply to MGET"))
        })
    }

    /// Sets several keys at once.
    fn mset<I, K, V>(&mut self, pairs: I) -> BoxFuture<'_, Result<()>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        let cmd = command::mset(pairs);
        Box::pin(async move {
            self.execute(cmd).await?;
            Ok(())
        })
    }

    /// Deletes keys. Returns how many existed.
    fn del<I, K>(&mut self, keys: I) -> BoxFuture<'_, Result<i64>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        let cmd = command::del(keys);
        Box::pin(async move { command::frame_to_int(self.execute(cmd).await?) })
    }

    /// Counts how many of the keys exist.
    fn exists<I, K>(&mut self, keys: I) -> BoxFuture<'_, Result<i64>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        let cmd = command::exists(keys);
        Box::pin(async move { command::frame_to_int(self.execute(cmd).await?) })
    }

    /// Increments the number stored at key by one.
    fn incr(&mut self, key: impl Into<Bytes>) -> BoxFuture<'_, Result<i64>> {
        let cmd = command::incr(key);
        Box::pin(async move { command::frame_to_int(self.execute(cmd).await?) })
    }

    /// Increments the number stored at key by `amount`.
    fn incr_by(&mut self, key: impl Into<Bytes>, amount: i64) -> BoxFuture<'_, Result<i64>> {
        let cmd = command::incr_by(key, amount);
        Box::pin(async move { command::frame_to_int(self.execute(cmd).await?) })
    }

    /// Decrements the number stored at key by one.
    fn decr(&mut self, key: impl Into<Bytes>) -> BoxFuture<'_, Result<i64>> {
        let cmd = command::decr(key);
        Box::pin(async move { command::frame_to_int(self.execute(cmd).await?) })
    }

    /// Adds members to a set. Returns how many were new.
    fn sadd<I, M>(&mut self, key: impl Into<Bytes>, members: I) -> BoxFuture<'_, Result<i64>>
    where
        I: IntoIterator<Item = M>,
        M: Into<Bytes>,
    {
        let cmd = command::sadd(key, members);
        Box::pin(async move { command::frame_to_int(self.execute(cmd).await?) })
    }

    /// Returns all members of a set, in server order.
    fn smembers(&mut self, key: impl Into<Bytes>) -> BoxFuture<'_, Result<Vec<Bytes>>> {
        let cmd = command::smembers(key);
        Box::pin(async move {
            let members = command::frame_to_vec_bytes(self.execute(cmd).await?)?
                .ok_or_else(|| Error::protocol("nil array in reply to SMEMBERS"))?;
            Ok(members.into_iter().flatten().collect())
        })
    }

    /// Prepends values to a list. Returns the new length.
    fn lpush<I, V>(&mut self, key: impl Into<Bytes>, values: I) -> BoxFuture<'_, Result<i64>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        let cmd = command::lpush(key, values);
        Box::pin(async move { command::frame_to_int(self.execute(cmd).await?) })
    }

    /// Removes and returns the first element of a list.
    fn lpop(&mut self, key: impl Into<Bytes>) -> BoxFuture<'_, Result<Option<Bytes>>> {
        let cmd = command::lpop(key);
        Box::pin(async move { command::frame_to_bytes(self.execute(cmd).await?) })
    }

    /// Returns the type of the value stored at key.
    fn key_type(&mut self, key: impl Into<Bytes>) -> BoxFuture<'_, Result<KeyType>> {
        let cmd = command::key_type(key);
        Box::pin(async move { command::frame_to_key_type(self.execute(cmd).await?) })
    }

    /// Removes every key of the selected database.
    fn flushdb(&mut self) -> BoxFuture<'_, Result<()>> {
        let cmd = command::flushdb();
        Box::pin(async move {
            self.execute(cmd).await?;
            Ok(())
        })
    }

    /// Watches keys for the next transaction.
    fn watch<I, K>(&mut self, keys: I) -> BoxFuture<'_, Result<()>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        let cmd = command::watch(keys);
        Box::pin(async move {
            self.execute(cmd).await?;
            Ok(())
        })
    }

    /// Forgets all watched keys.
    fn unwatch(&mut self) -> BoxFuture<'_, Result<()>> {
        let cmd = command::unwatch();
        Box::pin(async move {
            self.execute(cmd).await?;
            Ok(())
        })
    }
}

impl<E: Executor + ?Sized> Commands for E {}
