//! Two-round FROST signing

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, Scalar};
use mpc_rounds::{
    message, BoxedRound, ConstructionError, InvalidMessage, Message, MessageKind, MessageStore,
    PartyId, PartyIdSlice, Pool, ProtocolError, Round, RoundNumber, SessionContext, SessionInfo,
    StartFunc, Transition,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tracing::debug;

use super::math::{self, PointBytes, ScalarBytes};
use super::{Config, Variant};

pub(crate) fn start<V: Variant>(
    config: &V::Config,
    signers: PartyIdSlice,
    message: &[u8],
) -> StartFunc<V::Signature> {
    let key = V::key_material(config);
    let message = message.to_vec();
    Box::new(move |pool: &Pool| {
        let key = key?;
        let required = key.threshold + 1;
        if signers.len() < required {
            return Err(ConstructionError::InsufficientSigners {
                signers: signers.len(),
                required,
            });
        }
        if let Some(unknown) = signers
            .iter()
            .find(|s| !key.verification_shares.contains_key(*s))
        {
            return Err(ConstructionError::UnknownSigner(unknown.clone()));
        }

        let ctx = SessionContext::new(
            SessionInfo {
                protocol: V::SIGN,
                final_round: 3,
                self_id: key.id.clone(),
                party_ids: signers,
                threshold: key.threshold,
            },
            &[math::encode_point(&key.public_key).as_slice(), message.as_slice()],
            pool,
        )?;
        Ok(Box::new(Round1::<V> {
            ctx,
            key: Arc::new(key),
            message,
            _variant: PhantomData,
        }) as BoxedRound<V::Signature>)
    })
}

#[derive(Clone, Serialize, Deserialize)]
struct NonceCommitmentMsg {
    hiding: PointBytes,
    binding: PointBytes,
}

#[derive(Clone, Serialize, Deserialize)]
struct SignatureShareMsg {
    z: ScalarBytes,
}

/// Nonce commitments `(D, E)`
type NonceCommitment = (ProjectivePoint, ProjectivePoint);

struct Round1<V> {
    ctx: Arc<SessionContext>,
    key: Arc<Config>,
    message: Vec<u8>,
    _variant: PhantomData<V>,
}

impl<V: Variant> Round<V::Signature> for Round1<V> {
    fn context(&self) -> &SessionContext {
        &self.ctx
    }
    fn number(&self) -> RoundNumber {
        1
    }
    fn message_kind(&self) -> Option<MessageKind> {
        None
    }
    fn store_message(&mut self, _from: &PartyId, _payload: &[u8]) -> Result<(), InvalidMessage> {
        Err(InvalidMessage::UnexpectedMessage)
    }

    fn finalize(
        self: Box<Self>,
        out: &mut Vec<Message>,
    ) -> Result<Transition<V::Signature>, ProtocolError> {
        let nonces = (Scalar::random(&mut OsRng), Scalar::random(&mut OsRng));
        let commitment = (
            ProjectivePoint::GENERATOR * nonces.0,
            ProjectivePoint::GENERATOR * nonces.1,
        );
        self.ctx.broadcast(
            out,
            2,
            &NonceCommitmentMsg {
                hiding: math::encode_point(&commitment.0),
                binding: math::encode_point(&commitment.1),
            },
        )?;
        Ok(Transition::Next(Box::new(Round2::<V> {
            received: MessageStore::new(self.ctx.other_party_ids()),
            ctx: self.ctx,
            key: self.key,
            message: self.message,
            nonces,
            commitment,
            _variant: PhantomData,
        })))
    }
}

struct Round2<V> {
    ctx: Arc<SessionContext>,
    key: Arc<Config>,
    message: Vec<u8>,
    nonces: (Scalar, Scalar),
    commitment: NonceCommitment,
    received: MessageStore<NonceCommitment>,
    _variant: PhantomData<V>,
}

impl<V: Variant> Round<V::Signature> for Round2<V> {
    fn context(&self) -> &SessionContext {
        &self.ctx
    }
    fn number(&self) -> RoundNumber {
        2
    }
    fn message_kind(&self) -> Option<MessageKind> {
        Some(MessageKind::Broadcast)
    }

    fn store_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), InvalidMessage> {
        let msg: NonceCommitmentMsg = message::decode(payload)?;
        let hiding = math::decode_point(&msg.hiding)
            .ok_or_else(|| InvalidMessage::Malformed("invalid hiding nonce commitment".into()))?;
        let binding = math::decode_point(&msg.binding)
            .ok_or_else(|| InvalidMessage::Malformed("invalid binding nonce commitment".into()))?;
        self.received.push(from, (hiding, binding))?;
        Ok(())
    }

    fn finalize(
        self: Box<Self>,
        out: &mut Vec<Message>,
    ) -> Result<Transition<V::Signature>, ProtocolError> {
        let self_id = self.ctx.self_id().clone();
        let commitments = self
            .received
            .finish()?
            .including_me(self_id.clone(), self.commitment);

        let prefix = binding_prefix(&self.key.public_key, &self.message, &commitments);
        let xs: Vec<Scalar> = commitments.keys().map(math::party_scalar).collect();
        let per_signer = self.ctx.pool().map(
            commitments.clone(),
            move |(id, (d, e))| -> Option<(Scalar, ProjectivePoint, Scalar)> {
                let identifier = math::party_scalar(&id);
                let identifier_bytes = math::encode_scalar(&identifier);
                let rho = math::h1(&[prefix.as_slice(), identifier_bytes.as_slice()])?;
                let lambda = math::lagrange_at_zero(&identifier, &xs)?;
                Some((rho, d + e * rho, lambda))
            },
        )?;
        let per_signer = per_signer
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                ProtocolError::Inconsistent(
                    "binding factor or Lagrange coefficient can't be derived".into(),
                )
            })?;

        let r = per_signer
            .iter()
            .fold(ProjectivePoint::IDENTITY, |acc, (_, r_l, _)| acc + r_l);
        let (r, negate) = V::normalize_nonce(r);
        let challenge = V::challenge(&r, &self.key.public_key, &self.message)
            .ok_or_else(|| ProtocolError::Inconsistent("challenge can't be derived".into()))?;

        let mut expected = BTreeMap::new();
        let mut own = None;
        for (id, (rho, r_l, lambda)) in commitments.keys().zip(per_signer) {
            let r_l = if negate { -r_l } else { r_l };
            if *id == self_id {
                own = Some((rho, lambda));
            }
            expected.insert(id.clone(), (r_l, lambda));
        }
        let (rho, lambda) = own.ok_or_else(|| {
            ProtocolError::Inconsistent("local party is missing among signers".into())
        })?;

        let (d, e) = self.nonces;
        let k = d + e * rho;
        let k = if negate { -k } else { k };
        let z = k + lambda * challenge * self.key.private_share;

        self.ctx.broadcast(
            out,
            3,
            &SignatureShareMsg {
                z: math::encode_scalar(&z),
            },
        )?;

        Ok(Transition::Next(Box::new(Round3::<V> {
            shares: MessageStore::new(self.ctx.other_party_ids()),
            ctx: self.ctx,
            key: self.key,
            r,
            challenge,
            expected,
            z,
            _variant: PhantomData,
        })))
    }
}

/// `rho_input_prefix`: the group key, hash of the message and hash of the commitment list
///
/// Commitment list is encoded in ascending order of signers' identifiers.
fn binding_prefix(
    public_key: &ProjectivePoint,
    message: &[u8],
    commitments: &BTreeMap<PartyId, NonceCommitment>,
) -> Vec<u8> {
    let mut list: Vec<(ScalarBytes, &NonceCommitment)> = commitments
        .iter()
        .map(|(id, commitment)| (math::encode_scalar(&math::party_scalar(id)), commitment))
        .collect();
    list.sort_by(|a, b| a.0.cmp(&b.0));

    let mut encoded_list = math::h5();
    for (identifier, (d, e)) in list {
        encoded_list.update(identifier);
        encoded_list.update(math::encode_point(d));
        encoded_list.update(math::encode_point(e));
    }

    let mut prefix = math::encode_point(public_key);
    prefix.extend_from_slice(&math::h4().chain_update(message).finalize());
    prefix.extend_from_slice(&encoded_list.finalize());
    prefix
}

struct Round3<V> {
    ctx: Arc<SessionContext>,
    key: Arc<Config>,
    r: ProjectivePoint,
    challenge: Scalar,
    /// Nonce commitment `R_l` and Lagrange coefficient of every signer
    expected: BTreeMap<PartyId, (ProjectivePoint, Scalar)>,
    z: Scalar,
    shares: MessageStore<Scalar>,
    _variant: PhantomData<V>,
}

impl<V: Variant> Round<V::Signature> for Round3<V> {
    fn context(&self) -> &SessionContext {
        &self.ctx
    }
    fn number(&self) -> RoundNumber {
        3
    }
    fn message_kind(&self) -> Option<MessageKind> {
        Some(MessageKind::Broadcast)
    }

    fn store_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), InvalidMessage> {
        let msg: SignatureShareMsg = message::decode(payload)?;
        let z = math::decode_scalar(&msg.z)
            .ok_or_else(|| InvalidMessage::Malformed("invalid signature share".into()))?;
        let (r_l, lambda) = self
            .expected
            .get(from)
            .ok_or(InvalidMessage::UnexpectedSender)?;
        let y_l = self
            .key
            .verification_shares
            .get(from)
            .ok_or(InvalidMessage::UnexpectedSender)?;
        if ProjectivePoint::GENERATOR * z != *r_l + *y_l * (self.challenge * lambda) {
            return Err(InvalidMessage::Verification(
                "signature share doesn't match commitments".into(),
            ));
        }
        self.shares.push(from, z)?;
        Ok(())
    }

    fn finalize(
        self: Box<Self>,
        _out: &mut Vec<Message>,
    ) -> Result<Transition<V::Signature>, ProtocolError> {
        let z = self
            .shares
            .finish()?
            .into_iter()
            .fold(self.z, |acc, (_, z_l)| acc + z_l);
        if ProjectivePoint::GENERATOR * z != self.r + self.key.public_key * self.challenge {
            return Err(ProtocolError::Inconsistent(
                "aggregated signature is invalid".into(),
            ));
        }
        debug!(signers = self.ctx.party_ids().len(), "message signed");
        Ok(Transition::Done(V::signature(self.r, z)))
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;
    use mpc_rounds::Error;

    use super::*;
    use crate::frost::{keygen, sign};
    use crate::simulation;

    fn configs(ids: &PartyIdSlice, t: usize) -> Vec<Config> {
        let starts = ids.iter().map(|id| keygen(b"sign-tests", id.clone(), ids.clone(), t)).collect();
        simulation::run(starts)
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn binding_prefix_commits_to_every_input() {
        let g = ProjectivePoint::GENERATOR;
        let commitments: BTreeMap<PartyId, NonceCommitment> = [
            ("a".into(), (g, g.double())),
            ("b".into(), (g.double(), g)),
        ]
        .into_iter()
        .collect();
        let prefix = binding_prefix(&g, b"msg", &commitments);
        // Compressed key followed by two SHA-256 digests
        assert_eq!(prefix.len(), 33 + 32 + 32);

        assert_ne!(prefix, binding_prefix(&g, b"other msg", &commitments));
        assert_ne!(prefix, binding_prefix(&g.double(), b"msg", &commitments));
        let mut swapped = commitments.clone();
        swapped.insert("b".into(), (g, g.double()));
        assert_ne!(prefix, binding_prefix(&g, b"msg", &swapped));
    }

    #[test]
    fn forged_signature_share_is_detected() {
        let ids = PartyIdSlice::new(["a", "b", "c"]).unwrap();
        let configs = configs(&ids, 2);
        let starts = configs.iter().map(|c| sign(c, ids.clone(), b"hi")).collect();
        let outputs = simulation::run_with(starts, |mut msg| {
            if msg.round == 3 && msg.from == PartyId::from("b") {
                msg.payload = message::encode(&SignatureShareMsg {
                    z: math::encode_scalar(&Scalar::ONE),
                })
                .unwrap();
            }
            Some(msg)
        });
        for i in [0, 2] {
            assert_matches!(
                &outputs[i],
                Err(Error::InvalidMessage {
                    round: 3,
                    reason: InvalidMessage::Verification(_),
                    ..
                })
            );
        }
    }

    #[test]
    fn signers_must_agree_on_message() {
        let ids = PartyIdSlice::new(["a", "b"]).unwrap();
        let configs = configs(&ids, 1);
        let starts = vec![
            sign(&configs[0], ids.clone(), b"one"),
            sign(&configs[1], ids.clone(), b"two"),
        ];
        // Sessions have distinct identifiers, so parties ignore each other
        for output in simulation::run(starts) {
            assert_eq!(output, Err(Error::Stopped));
        }
    }

    #[test]
    fn undecodable_nonce_commitment_is_rejected() {
        let ids = PartyIdSlice::new(["a", "b"]).unwrap();
        let configs = configs(&ids, 1);
        let starts = configs.iter().map(|c| sign(c, ids.clone(), b"hi")).collect();
        let outputs = simulation::run_with(starts, |mut msg| {
            if msg.round == 2 && msg.from == PartyId::from("a") {
                msg.payload = message::encode(&NonceCommitmentMsg {
                    hiding: vec![0; 33],
                    binding: vec![0; 33],
                })
                .unwrap();
            }
            Some(msg)
        });
        assert_matches!(
            &outputs[1],
            Err(Error::InvalidMessage {
                round: 2,
                reason: InvalidMessage::Malformed(_),
                ..
            })
        );
    }
}
