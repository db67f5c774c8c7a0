//! Bipolar montage derivation.
//!
//! SEEG electrodes are named by a shaft prefix followed by a contact number
//! (`TIP1`, `TIP2`, ...). For each prefix every unordered pair of its
//! contacts becomes one derived channel `first - second`.

use std::collections::HashSet;

use regex::Regex;

use crate::error::{SeegError, Result};
use crate::recording::{Channel, Recording};

/// One derived channel: `anode - cathode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BipolarPair {
    pub anode: String,
    pub cathode: String,
    pub name: String,
    /// Prefix under which the pair was first produced.
    pub prefix: String,
}

impl BipolarPair {
    /// Unordered identity of the pair.
    pub fn key(&self) -> (String, String) {
        pair_key(&self.anode, &self.cathode)
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Pattern matching `prefix` followed by one or more ASCII digits and
/// nothing else. The prefix is taken literally.
pub fn contact_pattern(prefix: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^{}[0-9]+$", regex::escape(prefix)))?)
}

/// Names in `names` that are contacts of `prefix`, in their original order.
pub fn matching_contacts<'a>(names: &[&'a str], prefix: &str) -> Result<Vec<&'a str>> {
    let pattern = contact_pattern(prefix)?;
    Ok(names.iter().copied().filter(|name| pattern.is_match(name)).collect())
}

/// Plans the derived channels for `prefixes` without touching any data.
///
/// Prefixes are visited in order; a prefix with fewer than two contacts is
/// skipped, and a pair already produced under an earlier prefix is not
/// produced again. An empty plan is not an error here.
///
/// # Examples
///
/// ```rust
/// use seegprep::bipolar::plan_bipolar_pairs;
///
/// let names = ["TIP1", "TIP2", "TIP4", "BIA1"];
/// let pairs = plan_bipolar_pairs(&names, &["TIP", "BIA"], "-")?;
///
/// let derived: Vec<&str> = pairs.iter().map(|p| p.name.as_str()).collect();
/// assert_eq!(derived, vec!["TIP1-TIP2", "TIP1-TIP4", "TIP2-TIP4"]);
/// # Ok::<(), seegprep::SeegError>(())
/// ```
pub fn plan_bipolar_pairs<S: AsRef<str>>(names: &[&str], prefixes: &[S], separator: &str) -> Result<Vec<BipolarPair>> {
    let mut pairs = Vec::new();
    let mut used: HashSet<(String, String)> = HashSet::new();

    for prefix in prefixes {
        let prefix = prefix.as_ref();
        let contacts = matching_contacts(names, prefix)?;

        if contacts.len() < 2 {
            log::debug!("Prefix '{}' matches {} contact(s), skipped", prefix, contacts.len());
            continue;
        }

        let before = pairs.len();
        for (i, &anode) in contacts.iter().enumerate() {
            for &cathode in &contacts[i + 1..] {
                if !used.insert(pair_key(anode, cathode)) {
                    continue;
                }
                pairs.push(BipolarPair {
                    anode: anode.to_string(),
                    cathode: cathode.to_string(),
                    name: format!("{}{}{}", anode, separator, cathode),
                    prefix: prefix.to_string(),
                });
            }
        }

        log::debug!(
            "Prefix '{}': {} contacts, {} new pairs",
            prefix,
            contacts.len(),
            pairs.len() - before
        );
    }

    Ok(pairs)
}

/// Derives every bipolar channel for `prefixes` from `recording`.
///
/// The result holds only the derived channels and inherits the sampling
/// rate, start timestamp, filter metadata and annotation set of the source.
/// The source recording is not modified.
///
/// # Errors
///
/// [`SeegError::NoBipolarChannels`] when no prefix yields a pair.
///
/// # Examples
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use seegprep::recording::{Channel, Recording};
/// use seegprep::bipolar::create_bipolar_by_prefix;
///
/// let start = Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap();
/// let raw = Recording::new(
///     vec![
///         Channel::new("TIP1", "uV", vec![3.0, 4.0]),
///         Channel::new("TIP2", "uV", vec![1.0, 1.0]),
///     ],
///     512.0,
///     start,
/// )?;
///
/// let bipolar = create_bipolar_by_prefix(&raw, &["TIP"], "-")?;
/// assert_eq!(bipolar.data("TIP1-TIP2")?, &[2.0, 3.0]);
/// # Ok::<(), seegprep::SeegError>(())
/// ```
pub fn create_bipolar_by_prefix<S: AsRef<str>>(recording: &Recording, prefixes: &[S], separator: &str) -> Result<Recording> {
    let names = recording.channel_names();
    let pairs = plan_bipolar_pairs(&names, prefixes, separator)?;

    if pairs.is_empty() {
        let listed = prefixes.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(", ");
        return Err(SeegError::NoBipolarChannels(listed));
    }

    let mut channels = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        let anode = recording
            .channel(&pair.anode)
            .ok_or_else(|| SeegError::ChannelNotFound(pair.anode.clone()))?;
        let cathode = recording.data(&pair.cathode)?;

        let data = anode.data.iter().zip(cathode).map(|(a, c)| a - c).collect();
        channels.push(Channel::new(&pair.name, &anode.unit, data));
    }

    let derived = recording.with_channels(channels)?;
    log::info!(
        "Created {} bipolar channels from {} prefixes",
        derived.n_channels(),
        prefixes.len()
    );
    Ok(derived)
}
