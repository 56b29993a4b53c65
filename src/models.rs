/// One successful registration, as persisted in the record store.
///
/// The timestamp is kept as the ISO-8601 string that was written so reads
/// round-trip rows byte-for-byte regardless of who produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub timestamp: String,
    pub first_name: String,
    pub last_name: String,
    pub id_type: String,
    pub front_filename: String,
    pub back_filename: String,
}

impl Registration {
    /// Field values in record-store column order.
    pub fn columns(&self) -> [&str; 6] {
        [
            &self.timestamp,
            &self.first_name,
            &self.last_name,
            &self.id_type,
            &self.front_filename,
            &self.back_filename,
        ]
    }
}
