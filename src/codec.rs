//! Codec traits shared by every wire protocol in this crate.
//!
//! A [`Decoder`] consumes bytes from the front of a [`BytesMut`] and produces
//! complete items; a partial item leaves its bytes (or its accumulated state)
//! in place and returns `Ok(None)` until more data arrives. An [`Encoder`]
//! appends the wire form of an item to a [`BytesMut`].
//!
//! Both sides are synchronous and re-entrant: the I/O loop appends whatever a
//! non-blocking read produced and calls [`Decoder::decode`] in a loop until it
//! returns `Ok(None)`.

use bytes::BytesMut;

/// Decodes items from a byte buffer, retaining partial-item state between
/// calls.
pub trait Decoder {
    /// The item produced on a complete parse.
    type Item;
    /// The error produced on a malformed input. After an error the caller is
    /// expected to drop the connection; no partial state survives.
    type Error: From<std::io::Error>;

    /// Attempt to decode one item from the front of `src`.
    ///
    /// Consumed bytes must be split off `src`. Returns `Ok(None)` when more
    /// input is needed.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` on malformed input.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error>;
}

/// Encodes items into a byte buffer.
pub trait Encoder<Item> {
    /// The error produced when an item cannot be represented on the wire.
    type Error: From<std::io::Error>;

    /// Append the wire form of `item` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the item violates a protocol constraint.
    fn encode(&mut self, item: Item, dst: &mut BytesMut) -> Result<(), Self::Error>;
}
