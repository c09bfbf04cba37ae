//! Information about directory authorities.
//!
//! From a client's point of view, an authority's only role in this crate is
//! to co-sign consensus documents: component C (the signature validator)
//! counts how many of these authorities contributed a good signature.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use tor_llcrypto::pk::rsa::RsaIdentity;

/// A single directory authority trusted to co-sign consensus documents.
//
// Note that we do *not* set `serde(deny_unknown_fields)` on this structure:
// we want our authorities format to be future-proof against adding new info
// about each authority.
#[derive(Debug, Clone, Builder, Eq, PartialEq, Serialize, Deserialize)]
#[builder(derive(Debug))]
pub struct Authority {
    /// A memorable nickname for this authority.
    #[builder(setter(into))]
    pub name: String,
    /// A digest of the DER-encoded long-term v3 RSA identity key for this
    /// authority. This is the identity digest component C matches against
    /// `Voter::identity_digest`.
    pub v3ident: RsaIdentity,
}

impl Authority {
    /// Start building a new `Authority`.
    pub fn builder() -> AuthorityBuilder {
        AuthorityBuilder::default()
    }
}

/// The set of authorities a client trusts, in declaration order.
pub type AuthorityList = Vec<Authority>;

/// Return the built-in set of default directory authorities.
///
/// (List generated August 2020, matching the upstream Tor source's
/// `authority_cert_get_by_digest` table at the time this crate's teacher was
/// last synced; a real deployment overrides this via configuration.)
pub fn default_authorities() -> AuthorityList {
    /// Build an authority; panic if the input hex is malformed, since this
    /// list is a compile-time constant.
    fn auth(name: &str, key: &str) -> Authority {
        let v3ident =
            RsaIdentity::from_hex(key).expect("built-in authority identity had bad hex!?");
        Authority {
            name: name.to_string(),
            v3ident,
        }
    }

    vec![
        auth("bastet", "27102BC123E7AF1D4741AE047E160C91ADC76B21"),
        auth("dannenberg", "0232AF901C31A04EE9848595AF9BB7620D4C5B2E"),
        auth("dizum", "E8A9C45EDE6D711294FADF8E7951F4DE6CA56B58"),
        auth("gabelmoo", "ED03BB616EB2F60BEC80151114BB25CEF515B226"),
        auth("longclaw", "23D15D965BC35114467363C165C4F724B64B4F66"),
        auth("maatuska", "49015F787433103580E3B66A1707A00E60F2D15B"),
        auth("moria1", "F533C81CEF0BC0267857C99B2F471ADF249FA232"),
        auth("tor26", "2F3DF9CA0E5D36F2685A2DA67184EB8DCB8CBA8C"),
    ]
}
