//! Pedersen DKG with proofs of knowledge of the secret

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

use super::math::{self, PointBytes, Polynomial, ScalarBytes};
use super::{id_bytes, Config, Variant};

pub(crate) fn start<V: Variant>(
    eid: &[u8],
    id: PartyId,
    ids: PartyIdSlice,
    threshold: usize,
) -> StartFunc<V::Config> {
    let eid = eid.to_vec();
    Box::new(move |pool: &Pool| {
        let xs: Vec<Scalar> = ids.iter().map(math::party_scalar).collect();
        let collide = xs
            .iter()
            .enumerate()
            .any(|(i, x)| bool::from(x.is_zero()) || xs[..i].contains(x));
        if collide {
            return Err(ConstructionError::InvalidKey(
                "party identities map to colliding evaluation points".into(),
            ));
        }

        let ctx = SessionContext::new(
            SessionInfo {
                protocol: V::KEYGEN,
                final_round: 3,
                self_id: id,
                party_ids: ids,
                threshold,
            },
            &[eid.as_slice()],
            pool,
        )?;
        Ok(Box::new(Round1::<V> {
            polynomial: Polynomial::random(&mut OsRng, ctx.threshold()),
            ctx,
            _variant: PhantomData,
        }) as BoxedRound<V::Config>)
    })
}

#[derive(Clone, Serialize, Deserialize)]
struct CommitmentMsg {
    coefficients: Vec<PointBytes>,
    proof_r: PointBytes,
    proof_mu: ScalarBytes,
}

#[derive(Clone, Serialize, Deserialize)]
struct ShareMsg {
    share: ScalarBytes,
}

/// Challenge of the proof of knowledge of `a_0` such that `phi_0 = a_0 G`
fn pok_challenge(
    ctx: &SessionContext,
    prover: &PartyId,
    phi_0: &ProjectivePoint,
    r: &ProjectivePoint,
) -> Scalar {
    math::hash_to_scalar(
        ctx.hash()
            .chain_update(b"frost/keygen/pok")
            .chain_update(id_bytes(prover))
            .chain_update(math::encode_point(phi_0))
            .chain_update(math::encode_point(r)),
    )
}

struct Round1<V> {
    ctx: Arc<SessionContext>,
    polynomial: Polynomial,
    _variant: PhantomData<V>,
}

impl<V: Variant> Round<V::Config> for Round1<V> {
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
    ) -> Result<Transition<V::Config>, ProtocolError> {
        let commitments = self.polynomial.commit();

        let k = Scalar::random(&mut OsRng);
        let r = ProjectivePoint::GENERATOR * k;
        let c = pok_challenge(&self.ctx, self.ctx.self_id(), &commitments[0], &r);
        let mu = k + self.polynomial.secret() * &c;

        self.ctx.broadcast(
            out,
            2,
            &CommitmentMsg {
                coefficients: commitments.iter().map(math::encode_point).collect(),
                proof_r: math::encode_point(&r),
                proof_mu: math::encode_scalar(&mu),
            },
        )?;

        Ok(Transition::Next(Box::new(Round2::<V> {
            received: MessageStore::new(self.ctx.other_party_ids()),
            ctx: self.ctx,
            polynomial: self.polynomial,
            commitments,
            _variant: PhantomData,
        })))
    }
}

struct Round2<V> {
    ctx: Arc<SessionContext>,
    polynomial: Polynomial,
    commitments: Vec<ProjectivePoint>,
    received: MessageStore<Vec<ProjectivePoint>>,
    _variant: PhantomData<V>,
}

impl<V: Variant> Round<V::Config> for Round2<V> {
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
        let msg: CommitmentMsg = message::decode(payload)?;
        if msg.coefficients.len() != self.ctx.threshold() + 1 {
            return Err(InvalidMessage::Malformed(format!(
                "expected {} coefficient commitments, got {}",
                self.ctx.threshold() + 1,
                msg.coefficients.len()
            )));
        }
        let coefficients = self
            .ctx
            .pool()
            .map(msg.coefficients, |bytes| math::decode_point(&bytes))?
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| InvalidMessage::Malformed("invalid commitment point".into()))?;
        let r = math::decode_point(&msg.proof_r)
            .ok_or_else(|| InvalidMessage::Malformed("invalid proof commitment".into()))?;
        let mu = math::decode_scalar(&msg.proof_mu)
            .ok_or_else(|| InvalidMessage::Malformed("invalid proof response".into()))?;

        let c = pok_challenge(&self.ctx, from, &coefficients[0], &r);
        if ProjectivePoint::GENERATOR * mu != r + coefficients[0] * c {
            return Err(InvalidMessage::Verification(
                "invalid proof of knowledge of the secret".into(),
            ));
        }
        self.received.push(from, coefficients)?;
        Ok(())
    }

    fn finalize(
        self: Box<Self>,
        out: &mut Vec<Message>,
    ) -> Result<Transition<V::Config>, ProtocolError> {
        let self_id = self.ctx.self_id().clone();
        let commitments = self
            .received
            .finish()?
            .including_me(self_id.clone(), self.commitments);

        for j in self.ctx.party_ids().iter().filter(|j| **j != self_id) {
            let share = self.polynomial.evaluate(&math::party_scalar(j));
            self.ctx.send_to(
                out,
                3,
                j,
                &ShareMsg {
                    share: math::encode_scalar(&share),
                },
            )?;
        }

        Ok(Transition::Next(Box::new(Round3::<V> {
            own_share: self.polynomial.evaluate(&math::party_scalar(&self_id)),
            shares: MessageStore::new(self.ctx.other_party_ids()),
            ctx: self.ctx,
            commitments,
            _variant: PhantomData,
        })))
    }
}

struct Round3<V> {
    ctx: Arc<SessionContext>,
    own_share: Scalar,
    commitments: BTreeMap<PartyId, Vec<ProjectivePoint>>,
    shares: MessageStore<Scalar>,
    _variant: PhantomData<V>,
}

impl<V: Variant> Round<V::Config> for Round3<V> {
    fn context(&self) -> &SessionContext {
        &self.ctx
    }
    fn number(&self) -> RoundNumber {
        3
    }
    fn message_kind(&self) -> Option<MessageKind> {
        Some(MessageKind::P2P)
    }

    fn store_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), InvalidMessage> {
        let msg: ShareMsg = message::decode(payload)?;
        let share = math::decode_scalar(&msg.share)
            .ok_or_else(|| InvalidMessage::Malformed("invalid share".into()))?;
        let commitments = self
            .commitments
            .get(from)
            .ok_or(InvalidMessage::UnexpectedSender)?;
        let x_i = math::party_scalar(self.ctx.self_id());
        if ProjectivePoint::GENERATOR * share != math::evaluate_commitments(commitments, &x_i) {
            return Err(InvalidMessage::Verification(
                "share doesn't match polynomial commitments".into(),
            ));
        }
        self.shares.push(from, share)?;
        Ok(())
    }

    fn finalize(
        self: Box<Self>,
        _out: &mut Vec<Message>,
    ) -> Result<Transition<V::Config>, ProtocolError> {
        let private_share = self
            .shares
            .finish()?
            .into_iter()
            .fold(self.own_share, |acc, (_, share)| acc + share);
        let public_key = self
            .commitments
            .values()
            .fold(ProjectivePoint::IDENTITY, |acc, c| acc + c[0]);

        let ids: Vec<PartyId> = self.ctx.party_ids().to_vec();
        let commitments = Arc::new(self.commitments);
        let verification_shares = self.ctx.pool().map(ids.clone(), move |id| {
            let x = math::party_scalar(&id);
            commitments
                .values()
                .fold(ProjectivePoint::IDENTITY, |acc, c| {
                    acc + math::evaluate_commitments(c, &x)
                })
        })?;
        let verification_shares: BTreeMap<PartyId, ProjectivePoint> =
            ids.into_iter().zip(verification_shares).collect();

        let self_id = self.ctx.self_id();
        if verification_shares.get(self_id) != Some(&(ProjectivePoint::GENERATOR * private_share)) {
            return Err(ProtocolError::Inconsistent(
                "resulting share doesn't match public commitments".into(),
            ));
        }

        debug!(
            public_key = %hex::encode(math::encode_point(&public_key)),
            "key generated"
        );
        Ok(Transition::Done(V::finish_keygen(Config {
            id: self_id.clone(),
            threshold: self.ctx.threshold(),
            private_share,
            public_key,
            verification_shares,
        })))
    }
}
