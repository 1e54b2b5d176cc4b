//! The script evaluator (§4.4): a tiny stack machine validating
//! `signature_script ++ pk_script`.
//!
//! Collaborator used by the chain engine (`bitebi-chain`) to authorize
//! transaction inputs. Per the REDESIGN FLAG in spec §9, this uses the
//! **truthy-top** success predicate (standard Bitcoin semantics) rather
//! than requiring an empty stack.

use ed25519_dalek::{Verifier, VerifyingKey};

use crate::error::ScriptError;
use crate::hash::hash256;
use crate::types::Hash256;

/// A single script token: either a recognized opcode or a literal
/// byte-string push (everything that isn't a recognized opcode mnemonic).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Push(Vec<u8>),
    Dup,
    Hash160,
    Equal,
    EqualVerify,
    Verify,
    CheckSig,
    CheckMultiSig,
    Return,
}

/// A parsed script is just an ordered sequence of ops. Scripts on the wire
/// are opaque byte strings (`signature_script`/`pk_script`); this module's
/// caller is responsible for agreeing on an encoding. We use a simple
/// length-prefixed token stream: one byte tag per op, `Push` tagged `0x00`
/// followed by a `compact_uint` length and the raw bytes.
pub fn parse(bytes: &[u8]) -> Result<Vec<Op>, ScriptError> {
    use crate::codec::Reader;
    let mut r = Reader::new(bytes);
    let mut ops = Vec::new();
    while !r.is_empty() {
        let tag = r.read_u8().map_err(|_| ScriptError::StackUnderflow)?;
        let op = match tag {
            0x00 => {
                let len = r
                    .read_compact_uint()
                    .map_err(|_| ScriptError::StackUnderflow)?;
                let data = r
                    .read_bytes(len as usize)
                    .map_err(|_| ScriptError::StackUnderflow)?;
                Op::Push(data)
            }
            0x01 => Op::Dup,
            0x02 => Op::Hash160,
            0x03 => Op::Equal,
            0x04 => Op::EqualVerify,
            0x05 => Op::Verify,
            0x06 => Op::CheckSig,
            0x07 => Op::CheckMultiSig,
            0x08 => Op::Return,
            other => Op::Push(vec![other]),
        };
        ops.push(op);
    }
    Ok(ops)
}

/// Evaluate `signature_script` followed by `pk_script` against the given
/// signature digest, returning whether the input authorizes the spend
/// (§4.4: truthy top of stack at the end of execution).
pub fn verify_script(
    signature_script: &[u8],
    pk_script: &[u8],
    sighash: &Hash256,
) -> Result<bool, ScriptError> {
    let mut stack: Vec<Vec<u8>> = Vec::new();
    for ops in [parse(signature_script)?, parse(pk_script)?] {
        run(&ops, &mut stack, sighash)?;
    }
    Ok(stack.last().is_some_and(|top| is_truthy(top)))
}

fn is_truthy(item: &[u8]) -> bool {
    // Bitcoin Script truthiness: any non-empty value that isn't all-zero
    // (with the lone exception of a single negative-zero byte, irrelevant
    // here since this VM has no signed-integer encoding).
    item.iter().any(|&b| b != 0)
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::StackUnderflow)
}

fn run(ops: &[Op], stack: &mut Vec<Vec<u8>>, sighash: &Hash256) -> Result<(), ScriptError> {
    for op in ops {
        match op {
            Op::Push(data) => stack.push(data.clone()),
            Op::Dup => {
                let top = stack.last().ok_or(ScriptError::StackUnderflow)?.clone();
                stack.push(top);
            }
            Op::Hash160 => {
                let top = pop(stack)?;
                stack.push(hash256(&top).0.to_vec());
            }
            Op::Equal => {
                let b = pop(stack)?;
                let a = pop(stack)?;
                stack.push(if a == b { vec![1] } else { vec![0] });
            }
            Op::EqualVerify => {
                let b = pop(stack)?;
                let a = pop(stack)?;
                if a != b {
                    return Err(ScriptError::EqualVerifyFailed);
                }
            }
            Op::Verify => {
                let top = pop(stack)?;
                if !is_truthy(&top) {
                    return Err(ScriptError::VerifyFailed);
                }
            }
            Op::CheckSig => {
                let pk_bytes = pop(stack)?;
                let sig_bytes = pop(stack)?;
                let ok = verify_one(&pk_bytes, &sig_bytes, sighash);
                stack.push(if ok { vec![1] } else { vec![0] });
            }
            Op::CheckMultiSig => {
                let n = pop_count(stack)?;
                let mut pubkeys = Vec::with_capacity(n);
                for _ in 0..n {
                    pubkeys.push(pop(stack)?);
                }
                pubkeys.reverse(); // restore script declaration order
                let m = pop_count(stack)?;
                let mut sigs = Vec::with_capacity(m);
                for _ in 0..m {
                    sigs.push(pop(stack)?);
                }
                sigs.reverse(); // restore script declaration order
                let ok = check_multisig(&sigs, &pubkeys, sighash);
                stack.push(if ok { vec![1] } else { vec![0] });
            }
            Op::Return => return Err(ScriptError::EarlyReturn),
        }
    }
    Ok(())
}

fn pop_count(stack: &mut Vec<Vec<u8>>) -> Result<usize, ScriptError> {
    let bytes = pop(stack)?;
    match bytes.as_slice() {
        [] => Ok(0),
        [b] => Ok(*b as usize),
        _ => Err(ScriptError::MalformedMultisigCount),
    }
}

fn verify_one(pk_bytes: &[u8], sig_bytes: &[u8], sighash: &Hash256) -> bool {
    let Ok(pk_arr): Result<[u8; 32], _> = pk_bytes.try_into() else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(&pk_arr) else {
        return false;
    };
    let Ok(sig_arr): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig_arr);
    vk.verify(sighash.as_bytes(), &sig).is_ok()
}

/// `CHECKMULTISIG` (§4.4): succeeds iff at least `sigs.len()` signatures
/// verify against distinct pubkeys taken in order (each signature is
/// matched against the earliest not-yet-consumed pubkey it verifies
/// against, mirroring Bitcoin's in-order multisig matching).
fn check_multisig(sigs: &[Vec<u8>], pubkeys: &[Vec<u8>], sighash: &Hash256) -> bool {
    let mut pk_iter = pubkeys.iter();
    'sigs: for sig in sigs {
        for pk in pk_iter.by_ref() {
            if verify_one(pk, sig, sighash) {
                continue 'sigs;
            }
        }
        return false; // ran out of pubkeys before matching this signature
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn push_op(w: &mut crate::codec::Writer, data: &[u8]) {
        w.write_u8(0x00);
        w.write_compact_uint(data.len() as u64);
        w.write_bytes(data);
    }

    fn p2pkh_scripts(signing_key: &SigningKey, sighash: &Hash256) -> (Vec<u8>, Vec<u8>) {
        let sig = signing_key.sign(sighash.as_bytes()).to_bytes();
        let pk = signing_key.verifying_key().to_bytes();
        let pk_hash = hash256(&pk);

        let mut sig_script = crate::codec::Writer::new();
        push_op(&mut sig_script, &sig);
        push_op(&mut sig_script, &pk);

        let mut pk_script = crate::codec::Writer::new();
        pk_script.write_u8(0x01); // DUP
        pk_script.write_u8(0x02); // HASH160
        push_op(&mut pk_script, pk_hash.as_bytes());
        pk_script.write_u8(0x04); // EQUALVERIFY
        pk_script.write_u8(0x06); // CHECKSIG

        (sig_script.into_bytes(), pk_script.into_bytes())
    }

    #[test]
    fn p2pkh_style_script_succeeds_with_correct_signature() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let sighash = Hash256([42u8; 32]);
        let (sig_script, pk_script) = p2pkh_scripts(&key, &sighash);
        assert!(verify_script(&sig_script, &pk_script, &sighash).unwrap());
    }

    #[test]
    fn wrong_sighash_fails_checksig() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let sighash = Hash256([42u8; 32]);
        let (sig_script, pk_script) = p2pkh_scripts(&key, &sighash);
        let other_sighash = Hash256([43u8; 32]);
        assert!(!verify_script(&sig_script, &pk_script, &other_sighash).unwrap());
    }

    #[test]
    fn return_op_fails_immediately() {
        let mut w = crate::codec::Writer::new();
        w.write_u8(0x08); // RETURN
        let script = w.into_bytes();
        assert_eq!(
            verify_script(&[], &script, &Hash256::ZERO),
            Err(ScriptError::EarlyReturn)
        );
    }

    #[test]
    fn equalverify_mismatch_fails() {
        let mut sig_script = crate::codec::Writer::new();
        push_op(&mut sig_script, b"a");
        let mut pk_script = crate::codec::Writer::new();
        push_op(&mut pk_script, b"b");
        pk_script.write_u8(0x04); // EQUALVERIFY
        assert_eq!(
            verify_script(
                &sig_script.into_bytes(),
                &pk_script.into_bytes(),
                &Hash256::ZERO
            ),
            Err(ScriptError::EqualVerifyFailed)
        );
    }

    /// Builds `sig_1 .. sig_m ‖ m` (sig_script side) and
    /// `pubkey_1 .. pubkey_n ‖ n ‖ CHECKMULTISIG` (pk_script side), so that
    /// the stack reads bottom-to-top as
    /// `sig_1 .. sig_m, m, pubkey_1 .. pubkey_n, n` and popping at
    /// CHECKMULTISIG time yields `n`, then the pubkeys, then `m`, then the
    /// sigs, each count immediately preceding its pushed elements on the
    /// stack (§4.4).
    fn multisig_scripts(sigs: &[[u8; 64]], pubkeys: &[[u8; 32]]) -> (Vec<u8>, Vec<u8>) {
        let mut sig_script = crate::codec::Writer::new();
        for sig in sigs {
            push_op(&mut sig_script, sig);
        }
        push_op(&mut sig_script, &[sigs.len() as u8]);

        let mut pk_script = crate::codec::Writer::new();
        for pk in pubkeys {
            push_op(&mut pk_script, pk);
        }
        push_op(&mut pk_script, &[pubkeys.len() as u8]);
        pk_script.write_u8(0x07); // CHECKMULTISIG

        (sig_script.into_bytes(), pk_script.into_bytes())
    }

    #[test]
    fn checkmultisig_succeeds_with_partial_signers_in_order() {
        let k1 = SigningKey::from_bytes(&[1u8; 32]);
        let k2 = SigningKey::from_bytes(&[2u8; 32]);
        let k3 = SigningKey::from_bytes(&[3u8; 32]);
        let sighash = Hash256([9u8; 32]);

        let sig1 = k1.sign(sighash.as_bytes()).to_bytes();
        let sig3 = k3.sign(sighash.as_bytes()).to_bytes();

        let pubkeys = [
            k1.verifying_key().to_bytes(),
            k2.verifying_key().to_bytes(),
            k3.verifying_key().to_bytes(),
        ];
        let (sig_script, pk_script) = multisig_scripts(&[sig1, sig3], &pubkeys);
        assert!(verify_script(&sig_script, &pk_script, &sighash).unwrap());
    }

    #[test]
    fn checkmultisig_fails_when_a_signature_has_no_remaining_matching_pubkey() {
        let k1 = SigningKey::from_bytes(&[1u8; 32]);
        let k2 = SigningKey::from_bytes(&[2u8; 32]);
        let outsider = SigningKey::from_bytes(&[99u8; 32]);
        let sighash = Hash256([9u8; 32]);

        // outsider's signature doesn't match either registered pubkey.
        let sig1 = k1.sign(sighash.as_bytes()).to_bytes();
        let sig_outsider = outsider.sign(sighash.as_bytes()).to_bytes();

        let pubkeys = [k1.verifying_key().to_bytes(), k2.verifying_key().to_bytes()];
        let (sig_script, pk_script) = multisig_scripts(&[sig1, sig_outsider], &pubkeys);
        assert!(!verify_script(&sig_script, &pk_script, &sighash).unwrap());
    }

    #[test]
    fn checkmultisig_requires_signatures_in_the_same_order_as_pubkeys() {
        let k1 = SigningKey::from_bytes(&[1u8; 32]);
        let k2 = SigningKey::from_bytes(&[2u8; 32]);
        let sighash = Hash256([9u8; 32]);

        let sig1 = k1.sign(sighash.as_bytes()).to_bytes();
        let sig2 = k2.sign(sighash.as_bytes()).to_bytes();

        // sig2 before sig1: sig2 cannot match pubkey1 (wrong key), and once
        // we advance past pubkey1 looking for sig2's match we have no
        // pubkey left before pubkey2 to also satisfy sig1.
        let pubkeys = [k1.verifying_key().to_bytes(), k2.verifying_key().to_bytes()];
        let (sig_script, pk_script) = multisig_scripts(&[sig2, sig1], &pubkeys);
        assert!(!verify_script(&sig_script, &pk_script, &sighash).unwrap());
    }
}
