//! Noise handshake pattern table
//!
//! Each named pattern resolves to its pre-messages and an ordered list of
//! message patterns. Messages alternate direction starting with the
//! initiator.

use crate::error::CryptoError;

/// A single handshake token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    E,
    S,
    Ee,
    Es,
    Se,
    Ss,
}

use Token::{Ee, Es, Se, Ss, E, S};

/// Fully resolved token layout of a pattern
#[derive(Debug, PartialEq, Eq)]
pub struct PatternSpec {
    /// Keys the responder knows of the initiator before the handshake (`-> s`)
    pub initiator_pre: &'static [Token],
    /// Keys the initiator knows of the responder before the handshake (`<- s`)
    pub responder_pre: &'static [Token],
    pub messages: &'static [&'static [Token]],
}

/// Handshake pattern named in a Noise protocol name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakePattern {
    N,
    K,
    X,
    NN,
    NK,
    NX,
    XN,
    XK,
    XX,
    KN,
    KK,
    KX,
    IN,
    IK,
    IX,
}

const NONE: &[Token] = &[];
const STATIC: &[Token] = &[S];

static N: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: STATIC,
    messages: &[&[E, Es]],
};
static K: PatternSpec = PatternSpec {
    initiator_pre: STATIC,
    responder_pre: STATIC,
    messages: &[&[E, Es, Ss]],
};
static X: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: STATIC,
    messages: &[&[E, Es, S, Ss]],
};
static NN: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: NONE,
    messages: &[&[E], &[E, Ee]],
};
static NK: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: STATIC,
    messages: &[&[E, Es], &[E, Ee]],
};
static NX: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: NONE,
    messages: &[&[E], &[E, Ee, S, Es]],
};
static XN: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: NONE,
    messages: &[&[E], &[E, Ee], &[S, Se]],
};
static XK: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: STATIC,
    messages: &[&[E, Es], &[E, Ee], &[S, Se]],
};
static XX: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: NONE,
    messages: &[&[E], &[E, Ee, S, Es], &[S, Se]],
};
static KN: PatternSpec = PatternSpec {
    initiator_pre: STATIC,
    responder_pre: NONE,
    messages: &[&[E], &[E, Ee, Se]],
};
static KK: PatternSpec = PatternSpec {
    initiator_pre: STATIC,
    responder_pre: STATIC,
    messages: &[&[E, Es, Ss], &[E, Ee, Se]],
};
static KX: PatternSpec = PatternSpec {
    initiator_pre: STATIC,
    responder_pre: NONE,
    messages: &[&[E], &[E, Ee, Se, S, Es]],
};
static IN: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: NONE,
    messages: &[&[E, S], &[E, Ee, Se]],
};
static IK: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: STATIC,
    messages: &[&[E, Es, S, Ss], &[E, Ee, Se]],
};
static IX: PatternSpec = PatternSpec {
    initiator_pre: NONE,
    responder_pre: NONE,
    messages: &[&[E, S], &[E, Ee, Se, S, Es]],
};

impl HandshakePattern {
    /// Resolve the pattern token of a protocol name
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        let pattern = match name {
            "N" => Self::N,
            "K" => Self::K,
            "X" => Self::X,
            "NN" => Self::NN,
            "NK" => Self::NK,
            "NX" => Self::NX,
            "XN" => Self::XN,
            "XK" => Self::XK,
            "XX" => Self::XX,
            "KN" => Self::KN,
            "KK" => Self::KK,
            "KX" => Self::KX,
            "IN" => Self::IN,
            "IK" => Self::IK,
            "IX" => Self::IX,
            _ => {
                return Err(CryptoError::UnsupportedPrimitive {
                    component: "handshake pattern",
                    name: name.to_string(),
                })
            }
        };
        Ok(pattern)
    }

    /// Token used in protocol names
    pub fn name(&self) -> &'static str {
        match self {
            Self::N => "N",
            Self::K => "K",
            Self::X => "X",
            Self::NN => "NN",
            Self::NK => "NK",
            Self::NX => "NX",
            Self::XN => "XN",
            Self::XK => "XK",
            Self::XX => "XX",
            Self::KN => "KN",
            Self::KK => "KK",
            Self::KX => "KX",
            Self::IN => "IN",
            Self::IK => "IK",
            Self::IX => "IX",
        }
    }

    pub fn spec(&self) -> &'static PatternSpec {
        match self {
            Self::N => &N,
            Self::K => &K,
            Self::X => &X,
            Self::NN => &NN,
            Self::NK => &NK,
            Self::NX => &NX,
            Self::XN => &XN,
            Self::XK => &XK,
            Self::XX => &XX,
            Self::KN => &KN,
            Self::KK => &KK,
            Self::KX => &KX,
            Self::IN => &IN,
            Self::IK => &IK,
            Self::IX => &IX,
        }
    }

    /// One-way patterns carry a single message and only the initiator sends
    pub fn is_one_way(&self) -> bool {
        matches!(self, Self::N | Self::K | Self::X)
    }

    /// Whether the initiator's static key is used (pre-message or transmitted)
    pub fn initiator_needs_static(&self) -> bool {
        let spec = self.spec();
        !spec.initiator_pre.is_empty() || sends_static(spec, 0)
    }

    /// Whether the responder's static key is used (pre-message or transmitted)
    pub fn responder_needs_static(&self) -> bool {
        let spec = self.spec();
        !spec.responder_pre.is_empty() || sends_static(spec, 1)
    }
}

/// Whether the party writing messages at `parity` transmits its static key
fn sends_static(spec: &PatternSpec, parity: usize) -> bool {
    spec.messages
        .iter()
        .skip(parity)
        .step_by(2)
        .any(|message| message.contains(&S))
}
