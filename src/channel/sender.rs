use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::id::ChannelId;

/// The sending end of a channel: serializable, cloneable, and safe to mail anywhere (spec §4.2).
///
/// A `SendPort` carries nothing but a [`ChannelId`] — routing a value to it is the job of whatever
/// node context performs the send (see [`crate::process::LocalProcess::send_chan`]), not of the
/// port itself.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SendPort<T> {
    channel: ChannelId,
    #[serde(skip)]
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for SendPort<T> {
    fn clone(&self) -> Self {
        SendPort {
            channel: self.channel,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for SendPort<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendPort").field("channel", &self.channel).finish()
    }
}

impl<T> SendPort<T> {
    pub(crate) fn new(channel: ChannelId) -> Self {
        SendPort {
            channel,
            _marker: PhantomData,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }
}
