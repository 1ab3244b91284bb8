//! Pipeline and transaction bookkeeping.
//!
//! A [`Batch`] records, in write order, every reply the server owes for the
//! commands written since the batch was opened. Draining walks that list
//! front to back, reading exactly one frame per entry, and folds the frames
//! into the caller-visible result: one slot per enqueued command, with each
//! transaction's `EXEC` array flattened in place.

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::proto::error::ReplyError;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Outcome of one command in a drained batch.
pub type Reply = std::result::Result<Frame, ReplyError>;

/// Lifecycle of the batch API on a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// No batch is open; commands run one at a time.
    Idle,
    /// A pipeline or transaction is open and accepting commands.
    Queuing,
    /// Replies are being read back.
    Draining,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Idle => "idle",
            BatchState::Queuing => "queuing",
            BatchState::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// One reply the server owes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expect {
    /// Reply to an ordinary command; fills one slot.
    Reply,
    /// `+OK` for `MULTI`.
    Multi,
    /// `+QUEUED` (or an error) for a command inside a transaction.
    Queued,
    /// `EXEC`; its array fills one slot per queued command.
    Exec {
        /// Commands queued since the matching `MULTI`.
        commands: usize,
    },
    /// `+OK` for `DISCARD`. Fills no slots unless the server rejects it,
    /// in which case every discarded command gets the error.
    Discard {
        /// Commands queued since the matching `MULTI`.
        commands: usize,
    },
}

#[derive(Debug)]
struct Pending {
    expect: Expect,
    // Set when the reply was read eagerly, outside a pipeline.
    frame: Option<Frame>,
}

#[derive(Debug, Default)]
struct OpenTransaction {
    commands: usize,
}

/// Batch state for one connection.
#[derive(Debug)]
pub(crate) struct Batch {
    state: BatchState,
    pipelined: bool,
    transaction: Option<OpenTransaction>,
    pending: VecDeque<Pending>,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            state: BatchState::Idle,
            pipelined: false,
            transaction: None,
            pending: VecDeque::new(),
        }
    }
}

impl Batch {
    pub(crate) fn state(&self) -> BatchState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state != BatchState::Idle
    }

    /// True when replies must wait for the drain instead of being read
    /// right after each write. Once one reply is left unread, every later
    /// one must wait behind it.
    pub(crate) fn defers_reads(&self) -> bool {
        self.pipelined || self.outstanding() > 0
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// True once anything was written for this batch. From then on the
    /// batch is tied to the current socket.
    pub(crate) fn has_written(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of replies written but not yet read.
    pub(crate) fn outstanding(&self) -> usize {
        self.pending.iter().filter(|p| p.frame.is_none()).count()
    }

    pub(crate) fn begin_pipeline(&mut self) -> Result<()> {
        self.ensure_not_draining()?;
        if self.pipelined {
            return Err(Error::invalid_state("a pipeline is already open"));
        }
        self.pipelined = true;
        self.state = BatchState::Queuing;
        debug!("pipeline opened");
        Ok(())
    }

    /// Validates that a transaction may start. The caller writes `MULTI`
    /// and then calls [`record`](Batch::record) with [`Expect::Multi`].
    pub(crate) fn check_begin_transaction(&self) -> Result<()> {
        self.ensure_not_draining()?;
        if self.transaction.is_some() {
            return Err(Error::invalid_state("transactions cannot be nested"));
        }
        Ok(())
    }

    pub(crate) fn check_enqueue(&self) -> Result<()> {
        match self.state {
            BatchState::Queuing => Ok(()),
            BatchState::Idle => Err(Error::invalid_state(
                "no pipeline or transaction is open",
            )),
            BatchState::Draining => Err(Error::invalid_state("batch is draining")),
        }
    }

    pub(crate) fn check_transaction_open(&self) -> Result<()> {
        self.check_enqueue()?;
        if self.transaction.is_none() {
            return Err(Error::invalid_state("no transaction is open"));
        }
        Ok(())
    }

    /// Returns the entry that an enqueued command owes.
    pub(crate) fn expect_for_command(&self) -> Expect {
        if self.transaction.is_some() {
            Expect::Queued
        } else {
            Expect::Reply
        }
    }

    /// Records a reply the server owes for a command that was just written.
    /// `frame` carries the reply when it was read eagerly.
    pub(crate) fn record(&mut self, expect: Expect, frame: Option<Frame>) {
        match &expect {
            Expect::Multi => self.transaction = Some(OpenTransaction::default()),
            Expect::Queued => {
                if let Some(tx) = self.transaction.as_mut() {
                    tx.commands += 1;
                }
            }
            Expect::Exec { .. } | Expect::Discard { .. } => self.transaction = None,
            Expect::Reply => {}
        }
        self.state = BatchState::Queuing;
        self.pending.push_back(Pending { expect, frame });
    }

    /// The `EXEC` entry that closes the open transaction.
    pub(crate) fn exec_entry(&self) -> Expect {
        Expect::Exec {
            commands: self.queued_commands(),
        }
    }

    /// The `DISCARD` entry that drops the open transaction.
    pub(crate) fn discard_entry(&self) -> Expect {
        Expect::Discard {
            commands: self.queued_commands(),
        }
    }

    fn queued_commands(&self) -> usize {
        self.transaction.as_ref().map_or(0, |tx| tx.commands)
    }

    /// Moves into the draining state and hands back the owed replies.
    pub(crate) fn start_drain(&mut self) -> Result<Drain> {
        self.check_enqueue()?;
        self.state = BatchState::Draining;
        Ok(Drain {
            pending: std::mem::take(&mut self.pending),
            slots: Vec::new(),
            tx: TxReplies::default(),
        })
    }

    /// Returns to idle, forgetting everything that was queued.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    fn ensure_not_draining(&self) -> Result<()> {
        if self.state == BatchState::Draining {
            return Err(Error::invalid_state("batch is draining"));
        }
        Ok(())
    }
}

/// Acknowledgements collected while a transaction's replies are folded.
#[derive(Debug, Default)]
struct TxReplies {
    multi_error: Option<Vec<u8>>,
    queued: Vec<Option<Vec<u8>>>,
}

/// Replies still to be read for a batch, and the slots filled so far.
#[derive(Debug)]
pub(crate) struct Drain {
    pending: VecDeque<Pending>,
    slots: Vec<Reply>,
    tx: TxReplies,
}

impl Drain {
    /// Takes the next owed reply. The frame is present when it was read
    /// eagerly; otherwise the caller reads one from the socket.
    pub(crate) fn next(&mut self) -> Option<(Expect, Option<Frame>)> {
        self.pending.pop_front().map(|p| (p.expect, p.frame))
    }

    /// Folds one reply into the result.
    pub(crate) fn accept(&mut self, expect: Expect, frame: Frame) -> Result<()> {
        match expect {
            Expect::Reply => self.slots.push(into_reply(frame)),
            Expect::Multi => {
                self.tx = TxReplies::default();
                if let Frame::Error(message) = frame {
                    self.tx.multi_error = Some(message);
                }
            }
            Expect::Queued => self.tx.queued.push(match frame {
                Frame::Error(message) => Some(message),
                _ => None,
            }),
            Expect::Discard { commands } => {
                let tx = std::mem::take(&mut self.tx);
                if let Frame::Error(message) = frame {
                    debug!(commands, "DISCARD rejected by server");
                    let message = tx.multi_error.unwrap_or(message);
                    self.slots.extend(
                        (0..commands).map(|_| Err(ReplyError::server(&message))),
                    );
                }
            }
            Expect::Exec { commands } => {
                let tx = std::mem::take(&mut self.tx);
                self.accept_exec(commands, tx, frame)?;
            }
        }
        Ok(())
    }

    fn accept_exec(&mut self, commands: usize, tx: TxReplies, frame: Frame) -> Result<()> {
        match frame {
            Frame::Array(Some(items)) => {
                if items.len() != commands {
                    return Err(Error::protocol(format!(
                        "EXEC returned {} replies for {} queued commands",
                        items.len(),
                        commands
                    )));
                }
                self.slots.extend(items.into_iter().map(into_reply));
            }
            Frame::Array(None) => {
                debug!(commands, "transaction aborted by server");
                self.slots
                    .extend((0..commands).map(|_| Err(ReplyError::TransactionAborted)));
            }
            Frame::Error(exec_error) => {
                let aborted = exec_error.starts_with(b"EXECABORT");
                for i in 0..commands {
                    let queued = tx.queued.get(i).cloned().flatten();
                    let slot = match (&tx.multi_error, queued) {
                        (Some(message), _) => ReplyError::server(message),
                        (None, Some(message)) => ReplyError::server(&message),
                        (None, None) if aborted => ReplyError::TransactionAborted,
                        (None, None) => ReplyError::server(&exec_error),
                    };
                    self.slots.push(Err(slot));
                }
            }
            other => {
                return Err(Error::protocol(format!(
                    "unexpected reply to EXEC: {}",
                    other.to_display_string()
                )))
            }
        }
        Ok(())
    }

    /// Returns the caller-visible replies once every entry was accepted.
    pub(crate) fn finish(self) -> Vec<Reply> {
        self.slots
    }
}

fn into_reply(frame: Frame) -> Reply {
    match frame {
        Frame::Error(message) => Err(ReplyError::server(&message)),
        frame => Ok(frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_with(batch: &mut Batch, replies: Vec<Frame>) -> Result<Vec<Reply>> {
        let mut drain = batch.start_drain()?;
        let mut replies = replies.into_iter();
        while let Some((expect, frame)) = drain.next() {
            let frame = match frame {
                Some(frame) => frame,
                None => replies.next().expect("test supplied too few replies"),
            };
            drain.accept(expect, frame)?;
        }
        assert!(replies.next().is_none(), "test supplied too many replies");
        batch.reset();
        Ok(drain.finish())
    }

    fn queued() -> Frame {
        Frame::status("QUEUED")
    }

    #[test]
    fn test_state_transitions() {
        let mut batch = Batch::default();
        assert_eq!(batch.state(), BatchState::Idle);
        assert!(batch.check_enqueue().is_err());

        batch.begin_pipeline().unwrap();
        assert_eq!(batch.state(), BatchState::Queuing);
        assert!(batch.begin_pipeline().is_err());

        let drain = batch.start_drain().unwrap();
        assert_eq!(batch.state(), BatchState::Draining);
        assert!(batch.check_enqueue().is_err());
        assert!(drain.finish().is_empty());

        batch.reset();
        assert_eq!(batch.state(), BatchState::Idle);
    }

    #[test]
    fn test_pipeline_keeps_order_and_isolates_errors() {
        let mut batch = Batch::default();
        batch.begin_pipeline().unwrap();
        for _ in 0..3 {
            let expect = batch.expect_for_command();
            batch.record(expect, None);
        }
        assert_eq!(batch.outstanding(), 3);

        let replies = drain_with(
            &mut batch,
            vec![
                Frame::status("OK"),
                Frame::Error(b"ERR unknown command 'BOGUS'".to_vec()),
                Frame::bulk("v"),
            ],
        )
        .unwrap();

        assert_eq!(
            replies,
            vec![
                Ok(Frame::status("OK")),
                Err(ReplyError::Server {
                    message: "ERR unknown command 'BOGUS'".to_string()
                }),
                Ok(Frame::bulk("v")),
            ]
        );
    }

    #[test]
    fn test_transaction_flattens_exec() {
        let mut batch = Batch::default();
        batch.check_begin_transaction().unwrap();
        batch.record(Expect::Multi, Some(Frame::status("OK")));
        assert!(batch.in_transaction());
        assert!(batch.check_begin_transaction().is_err());

        batch.record(batch.expect_for_command(), Some(queued()));
        batch.record(batch.expect_for_command(), Some(queued()));
        let exec = batch.exec_entry();
        assert_eq!(exec, Expect::Exec { commands: 2 });
        batch.record(exec, None);
        assert!(!batch.in_transaction());
        assert_eq!(batch.outstanding(), 1);

        let replies = drain_with(
            &mut batch,
            vec![Frame::array(vec![Frame::Integer(1), Frame::Integer(1)])],
        )
        .unwrap();
        assert_eq!(replies, vec![Ok(Frame::Integer(1)), Ok(Frame::Integer(1))]);
    }

    #[test]
    fn test_pipelined_transaction_between_plain_commands() {
        let mut batch = Batch::default();
        batch.begin_pipeline().unwrap();
        batch.record(Expect::Reply, None);
        batch.record(Expect::Multi, None);
        batch.record(batch.expect_for_command(), None);
        batch.record(batch.expect_for_command(), None);
        batch.record(batch.exec_entry(), None);
        batch.record(Expect::Reply, None);

        let replies = drain_with(
            &mut batch,
            vec![
                Frame::status("OK"),
                Frame::status("OK"),
                queued(),
                queued(),
                Frame::array(vec![Frame::Integer(2), Frame::Integer(3)]),
                Frame::bulk("after"),
            ],
        )
        .unwrap();
        assert_eq!(
            replies,
            vec![
                Ok(Frame::status("OK")),
                Ok(Frame::Integer(2)),
                Ok(Frame::Integer(3)),
                Ok(Frame::bulk("after")),
            ]
        );
    }

    #[test]
    fn test_nil_exec_marks_every_slot_aborted() {
        let mut batch = Batch::default();
        batch.record(Expect::Multi, Some(Frame::status("OK")));
        batch.record(Expect::Queued, Some(queued()));
        batch.record(Expect::Queued, Some(queued()));
        batch.record(batch.exec_entry(), None);

        let replies = drain_with(&mut batch, vec![Frame::Array(None)]).unwrap();
        assert_eq!(
            replies,
            vec![
                Err(ReplyError::TransactionAborted),
                Err(ReplyError::TransactionAborted)
            ]
        );
    }

    #[test]
    fn test_execabort_keeps_queue_errors() {
        let mut batch = Batch::default();
        batch.record(Expect::Multi, Some(Frame::status("OK")));
        batch.record(Expect::Queued, Some(queued()));
        batch.record(
            Expect::Queued,
            Some(Frame::Error(b"ERR unknown command 'NOPE'".to_vec())),
        );
        batch.record(batch.exec_entry(), None);

        let replies = drain_with(
            &mut batch,
            vec![Frame::Error(
                b"EXECABORT Transaction discarded because of previous errors.".to_vec(),
            )],
        )
        .unwrap();
        assert_eq!(
            replies,
            vec![
                Err(ReplyError::TransactionAborted),
                Err(ReplyError::Server {
                    message: "ERR unknown command 'NOPE'".to_string()
                }),
            ]
        );
    }

    #[test]
    fn test_exec_length_mismatch_is_protocol_error() {
        let mut batch = Batch::default();
        batch.record(Expect::Multi, Some(Frame::status("OK")));
        batch.record(Expect::Queued, Some(queued()));
        batch.record(batch.exec_entry(), None);

        let err = drain_with(&mut batch, vec![Frame::array(Vec::new())]).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_discard_drops_transaction_slots() {
        let mut batch = Batch::default();
        batch.begin_pipeline().unwrap();
        batch.record(Expect::Reply, None);
        batch.record(Expect::Multi, None);
        batch.record(batch.expect_for_command(), None);
        batch.record(batch.discard_entry(), None);
        assert!(!batch.in_transaction());

        let replies = drain_with(
            &mut batch,
            vec![
                Frame::Integer(7),
                Frame::status("OK"),
                queued(),
                Frame::status("OK"),
            ],
        )
        .unwrap();
        assert_eq!(replies, vec![Ok(Frame::Integer(7))]);
    }

    #[test]
    fn test_rejected_discard_fills_discarded_slots() {
        let mut batch = Batch::default();
        batch.begin_pipeline().unwrap();
        batch.record(Expect::Reply, None);
        batch.record(Expect::Multi, None);
        batch.record(batch.expect_for_command(), None);
        batch.record(batch.expect_for_command(), None);
        let discard = batch.discard_entry();
        assert_eq!(discard, Expect::Discard { commands: 2 });
        batch.record(discard, None);

        let replies = drain_with(
            &mut batch,
            vec![
                Frame::status("OK"),
                Frame::status("OK"),
                queued(),
                queued(),
                Frame::Error(b"ERR DISCARD failed".to_vec()),
            ],
        )
        .unwrap();
        let rejected = ReplyError::Server {
            message: "ERR DISCARD failed".to_string(),
        };
        assert_eq!(
            replies,
            vec![
                Ok(Frame::status("OK")),
                Err(rejected.clone()),
                Err(rejected),
            ]
        );
    }

    #[test]
    fn test_unread_reply_defers_later_reads() {
        let mut batch = Batch::default();
        batch.record(Expect::Multi, Some(Frame::status("OK")));
        batch.record(Expect::Queued, Some(queued()));
        assert!(!batch.defers_reads());

        batch.record(batch.exec_entry(), None);
        assert!(batch.defers_reads());
    }
}
