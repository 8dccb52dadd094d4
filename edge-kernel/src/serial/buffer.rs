use crate::models::TelemetryRecord;

/// Buffer télémétrie borné entre la réception et la persistance.
///
/// Au-delà de `high_water` entrées, seules les `low_water` plus récentes sont
/// gardées. C'est une perte silencieuse assumée quand le stockage ne suit pas.
#[derive(Debug)]
pub struct TelemetryBuffer {
    entries: Vec<TelemetryRecord>,
    high_water: usize,
    low_water: usize,
}

impl TelemetryBuffer {
    pub fn new(high_water: usize, low_water: usize) -> Self {
        Self {
            entries: Vec::new(),
            high_water,
            low_water: low_water.min(high_water),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ajoute un enregistrement ; retourne le nombre d'entrées évincées
    pub fn push(&mut self, record: TelemetryRecord) -> usize {
        self.entries.push(record);
        self.enforce_cap()
    }

    /// Vide le buffer et rend tout son contenu (swap atomique sous le lock)
    pub fn take(&mut self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut self.entries)
    }

    /// Remet en tête un lot dont la persistance a échoué, devant ce qui est
    /// arrivé entre-temps. Retourne le nombre d'entrées évincées.
    pub fn restore(&mut self, mut failed: Vec<TelemetryRecord>) -> usize {
        failed.append(&mut self.entries);
        self.entries = failed;
        self.enforce_cap()
    }

    fn enforce_cap(&mut self) -> usize {
        if self.entries.len() <= self.high_water {
            return 0;
        }
        let evicted = self.entries.len() - self.low_water;
        self.entries.drain(..evicted);
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.entries.iter()
    }
}
