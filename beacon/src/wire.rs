//! Messages exchanged by group members over the broadcast channel.
//!
//! Every message starts with a one-byte type tag followed by the sender's
//! member index and the payload of that type.

use crate::group::MemberIndex;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use commonware_cryptography::{
    bls12381::primitives::{poly::PartialSignature, variant::Variant},
    sha256::Digest,
    PublicKey, Verifier,
};

/// Tag of a [ResultSignature] message.
const RESULT_SIGNATURE: u8 = 0;

/// Tag of a [SignatureShare] message.
const SIGNATURE_SHARE: u8 = 1;

/// A protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message<P: PublicKey, V: Variant> {
    ResultSignature(ResultSignature<P>),
    SignatureShare(SignatureShare<V>),
}

impl<P: PublicKey, V: Variant> Message<P, V> {
    /// Returns the member index the message claims to originate from.
    pub fn sender(&self) -> MemberIndex {
        match self {
            Message::ResultSignature(message) => message.sender,
            Message::SignatureShare(message) => message.sender,
        }
    }
}

impl<P: PublicKey, V: Variant> Write for Message<P, V> {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Message::ResultSignature(message) => {
                RESULT_SIGNATURE.write(buf);
                message.write(buf);
            }
            Message::SignatureShare(message) => {
                SIGNATURE_SHARE.write(buf);
                message.write(buf);
            }
        }
    }
}

impl<P: PublicKey, V: Variant> Read for Message<P, V> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let tag = u8::read(buf)?;
        match tag {
            RESULT_SIGNATURE => Ok(Message::ResultSignature(ResultSignature::read(buf)?)),
            SIGNATURE_SHARE => Ok(Message::SignatureShare(SignatureShare::read(buf)?)),
            _ => Err(Error::InvalidEnum(tag)),
        }
    }
}

impl<P: PublicKey, V: Variant> EncodeSize for Message<P, V> {
    fn encode_size(&self) -> usize {
        1 + match self {
            Message::ResultSignature(message) => message.encode_size(),
            Message::SignatureShare(message) => message.encode_size(),
        }
    }
}

/// A member's signature over the hash of the DKG result it prefers.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultSignature<P: PublicKey> {
    pub sender: MemberIndex,
    pub result_hash: Digest,
    pub signature: <P as Verifier>::Signature,

    /// Key the signature verifies against. Must match the key the transport
    /// attests for the sender.
    pub public_key: P,
}

impl<P: PublicKey> Write for ResultSignature<P> {
    fn write(&self, buf: &mut impl BufMut) {
        self.sender.write(buf);
        self.result_hash.write(buf);
        self.signature.write(buf);
        self.public_key.write(buf);
    }
}

impl<P: PublicKey> Read for ResultSignature<P> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let sender = MemberIndex::read(buf)?;
        if sender == 0 {
            return Err(Error::Invalid("ResultSignature", "sender is zero"));
        }
        let result_hash = Digest::read(buf)?;
        let signature = <P as Verifier>::Signature::read(buf)?;
        let public_key = P::read(buf)?;
        Ok(Self {
            sender,
            result_hash,
            signature,
            public_key,
        })
    }
}

impl<P: PublicKey> EncodeSize for ResultSignature<P> {
    fn encode_size(&self) -> usize {
        self.sender.encode_size()
            + self.result_hash.encode_size()
            + self.signature.encode_size()
            + self.public_key.encode_size()
    }
}

/// A member's share of the threshold signature over a relay entry seed.
#[derive(Clone, Debug, PartialEq)]
pub struct SignatureShare<V: Variant> {
    pub sender: MemberIndex,
    pub share: PartialSignature<V>,
}

impl<V: Variant> Write for SignatureShare<V> {
    fn write(&self, buf: &mut impl BufMut) {
        self.sender.write(buf);
        self.share.write(buf);
    }
}

impl<V: Variant> Read for SignatureShare<V> {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let sender = MemberIndex::read(buf)?;
        if sender == 0 {
            return Err(Error::Invalid("SignatureShare", "sender is zero"));
        }
        let share = PartialSignature::<V>::read(buf)?;
        Ok(Self { sender, share })
    }
}

impl<V: Variant> EncodeSize for SignatureShare<V> {
    fn encode_size(&self) -> usize {
        self.sender.encode_size() + self.share.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use commonware_cryptography::{
        bls12381::{
            dkg::ops::generate_shares,
            primitives::{ops, variant::MinSig},
        },
        ed25519, Hasher, PrivateKeyExt, Sha256, Signer,
    };
    use rand::{rngs::StdRng, SeedableRng};

    type Wire = Message<ed25519::PublicKey, MinSig>;

    #[test]
    fn test_result_signature_codec() {
        let signer = ed25519::PrivateKey::from_seed(7);
        let mut hasher = Sha256::new();
        hasher.update(b"result");
        let result_hash = hasher.finalize();
        let message: Wire = Message::ResultSignature(ResultSignature {
            sender: 3,
            result_hash,
            signature: signer.sign(None, &result_hash),
            public_key: signer.public_key(),
        });

        let encoded = message.encode();
        assert_eq!(encoded.len(), message.encode_size());
        assert_eq!(encoded[0], RESULT_SIGNATURE);
        let decoded = Wire::decode(encoded).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.sender(), 3);
    }

    #[test]
    fn test_signature_share_codec() {
        let mut rng = StdRng::seed_from_u64(0);
        let (_, shares) = generate_shares::<_, MinSig>(&mut rng, None, 4, 3);
        let message: Wire = Message::SignatureShare(SignatureShare {
            sender: 2,
            share: ops::partial_sign_message::<MinSig>(&shares[1], None, b"seed"),
        });

        let encoded = message.encode();
        assert_eq!(encoded[0], SIGNATURE_SHARE);
        let decoded = Wire::decode(encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_invalid_messages() {
        // Unknown tag
        assert!(matches!(
            Wire::decode(&[9u8, 1][..]),
            Err(Error::InvalidEnum(9))
        ));

        // Zero sender
        let signer = ed25519::PrivateKey::from_seed(0);
        let message: Wire = Message::ResultSignature(ResultSignature {
            sender: 0,
            result_hash: Sha256::new().finalize(),
            signature: signer.sign(None, b"x"),
            public_key: signer.public_key(),
        });
        assert!(Wire::decode(message.encode()).is_err());

        // Truncated
        let encoded = message.encode();
        assert!(Wire::decode(&encoded[..encoded.len() - 1]).is_err());
    }
}
