/*
 * The table of BIDS entity codes and their human-readable names, in the order
 * in which they appear in a BIDS filename. The registry is an explicit value
 * that callers pass around; unknown codes are still accepted everywhere and
 * are shown by their code.
 */

const BIDS_ENTITIES: &[(&str, &str)] = &[
    ("sub", "Subject"),
    ("ses", "Session"),
    ("sample", "Sample"),
    ("task", "Task"),
    ("tracksys", "Tracking System"),
    ("acq", "Acquisition"),
    ("nuc", "Nucleus"),
    ("voi", "Volume of Interest"),
    ("ce", "Contrast Enhancing Agent"),
    ("trc", "Tracer"),
    ("stain", "Stain"),
    ("rec", "Reconstruction"),
    ("dir", "Phase-Encoding Direction"),
    ("run", "Run"),
    ("mod", "Corresponding Modality"),
    ("echo", "Echo"),
    ("flip", "Flip Angle"),
    ("inv", "Inversion Time"),
    ("mt", "Magnetization Transfer"),
    ("part", "Part"),
    ("proc", "Processed (on device)"),
    ("hemi", "Hemisphere"),
    ("space", "Space"),
    ("split", "Split"),
    ("recording", "Recording"),
    ("chunk", "Chunk"),
    ("seg", "Segmentation"),
    ("res", "Resolution"),
    ("den", "Density"),
    ("label", "Label"),
    ("desc", "Description"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRegistry {
    entries: Vec<(String, String)>,
}

impl EntityRegistry {
    /* The standard BIDS entity table. */
    pub fn bids() -> Self {
        EntityRegistry {
            entries: BIDS_ENTITIES
                .iter()
                .map(|(code, name)| (code.to_string(), name.to_string()))
                .collect(),
        }
    }

    pub fn from_entries(entries: Vec<(String, String)>) -> Self {
        EntityRegistry { entries }
    }

    pub fn is_known(&self, code: &str) -> bool {
        self.position(code).is_some()
    }

    /*
     * Returns the display name for an entity code, or the code itself if the
     * registry does not know it.
     */
    pub fn full_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.entries
            .iter()
            .find(|(known, _)| known == code)
            .map(|(_, name)| name.as_str())
            .unwrap_or(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(code, _)| code.as_str())
    }

    fn position(&self, code: &str) -> Option<usize> {
        self.entries.iter().position(|(known, _)| known == code)
    }

    /*
     * Sorts entity codes into filename order: registered codes first, in
     * registry order, then unknown codes alphabetically.
     */
    pub fn sort_codes<I, S>(&self, codes: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sorted: Vec<String> = codes.into_iter().map(Into::into).collect();
        sorted.sort_by(|a, b| {
            let key_a = (self.position(a).unwrap_or(usize::MAX), a.as_str());
            let key_b = (self.position(b).unwrap_or(usize::MAX), b.as_str());
            key_a.cmp(&key_b)
        });
        sorted.dedup();
        sorted
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::bids()
    }
}
