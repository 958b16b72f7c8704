use std::{fmt, str::FromStr};

use macaddr::MacAddr6;
use serde::{Deserialize, Serialize};

/// A hardware address in its canonical form: colon-separated lowercase.
///
/// iPXE firmware sends MACs dash-separated (`${netX/mac:hexhyp}`) and
/// operator forms may send either shape; both parse. The dash form is only
/// produced on the way out, for rendered scripts and synthesized hostnames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mac(MacAddr6);

impl Mac {
    /// Dash-separated lowercase form, e.g. `aa-bb-cc-dd-ee-ff`.
    pub fn dashed(&self) -> String {
        self.to_string().replace(':', "-")
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octets = self.0.as_bytes();
        for (i, octet) in octets.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{octet:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid MAC address: {input:?}")]
pub struct ParseMacError {
    input: String,
}

impl FromStr for Mac {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<MacAddr6>()
            .map(Mac)
            .map_err(|_| ParseMacError { input: s.to_owned() })
    }
}

impl Serialize for Mac {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Mac {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = String::deserialize(deserializer)?;
        v.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_colon_and_dash_forms() {
        let colon: Mac = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let dash: Mac = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(colon, dash);
    }

    #[test]
    fn test_canonical_form_is_lowercase_colons() {
        let mac: Mac = "06-66-DE-AD-BE-EF".parse().unwrap();
        assert_eq!(mac.to_string(), "06:66:de:ad:be:ef");
        assert_eq!(mac.dashed(), "06-66-de-ad-be-ef");
    }

    #[test]
    fn test_dash_colon_round_trip() {
        for raw in ["00:11:22:33:44:55", "a0:b1:c2:d3:e4:f5"] {
            let mac: Mac = raw.parse().unwrap();
            let back: Mac = mac.dashed().parse().unwrap();
            assert_eq!(mac, back);
            assert_eq!(back.to_string(), raw);
        }
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!("".parse::<Mac>().is_err());
        assert!("aa:bb:cc".parse::<Mac>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<Mac>().is_err());
        assert!("aabbccddeeff0011".parse::<Mac>().is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let mac: Mac = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(
            serde_json::to_string(&mac).unwrap(),
            "\"aa:bb:cc:dd:ee:ff\""
        );
    }
}
