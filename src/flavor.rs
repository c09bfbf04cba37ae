//! The set of consensus document flavors this crate understands.

use std::str::FromStr;

use strum::{Display, EnumString};

/// A format variant of the consensus document, distinguished by which
/// per-relay digest it commits to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Display, EnumString)]
#[non_exhaustive]
pub enum Flavor {
    /// The original consensus flavor, keyed by router-descriptor digest.
    #[strum(serialize = "ns")]
    Ns,
    /// The microdescriptor-keyed consensus flavor.
    #[strum(serialize = "microdesc")]
    Microdesc,
}

impl Flavor {
    /// All flavors this crate knows about, in a stable declaration order.
    pub const ALL: [Flavor; 2] = [Flavor::Ns, Flavor::Microdesc];

    /// Return the name used for this flavor on the wire and in filenames.
    pub fn name(&self) -> &'static str {
        match self {
            Flavor::Ns => "ns",
            Flavor::Microdesc => "microdesc",
        }
    }

    /// Parse a flavor name as it appears on the wire or in a filename.
    ///
    /// Returns `None` for any name this crate doesn't recognize; callers
    /// decide whether an unrecognized name is an error.
    pub fn parse_name(name: &str) -> Option<Flavor> {
        Flavor::from_str(name).ok()
    }
}

/// A small fixed-size map keyed by [`Flavor`], used wherever the spec calls
/// for "per flavor, independently evolving" state.
#[derive(Debug, Clone, Default)]
pub struct Flavored<T> {
    ns: T,
    microdesc: T,
}

impl<T> Flavored<T> {
    /// Construct a new per-flavor map from a constructor function.
    pub fn new(mut f: impl FnMut(Flavor) -> T) -> Self {
        Flavored {
            ns: f(Flavor::Ns),
            microdesc: f(Flavor::Microdesc),
        }
    }

    /// Borrow the value for `flavor`.
    pub fn get(&self, flavor: Flavor) -> &T {
        match flavor {
            Flavor::Ns => &self.ns,
            Flavor::Microdesc => &self.microdesc,
        }
    }

    /// Mutably borrow the value for `flavor`.
    pub fn get_mut(&mut self, flavor: Flavor) -> &mut T {
        match flavor {
            Flavor::Ns => &mut self.ns,
            Flavor::Microdesc => &mut self.microdesc,
        }
    }

    /// Iterate over `(Flavor, &T)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (Flavor, &T)> {
        Flavor::ALL.into_iter().map(move |fl| (fl, self.get(fl)))
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::unwrap_used)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn name_roundtrip() {
        for flavor in Flavor::ALL {
            assert_eq!(Flavor::parse_name(flavor.name()), Some(flavor));
        }
        assert_eq!(Flavor::parse_name("bogus"), None);
    }

    #[test]
    fn flavored_map() {
        let mut m: Flavored<u32> = Flavored::new(|fl| if fl == Flavor::Ns { 1 } else { 2 });
        assert_eq!(*m.get(Flavor::Ns), 1);
        assert_eq!(*m.get(Flavor::Microdesc), 2);
        *m.get_mut(Flavor::Ns) = 10;
        assert_eq!(*m.get(Flavor::Ns), 10);
        let collected: Vec<_> = m.iter().map(|(fl, v)| (fl, *v)).collect();
        assert_eq!(collected, vec![(Flavor::Ns, 10), (Flavor::Microdesc, 2)]);
    }
}
