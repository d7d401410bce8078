use std::collections::HashMap;

use crate::models::{FilamentEntry, PrintJobSummary};
use crate::parse::{format_grams, format_minutes};

/// One filament chip as read off a plate.
#[derive(Debug, Clone, PartialEq)]
pub struct FilamentReading {
    pub material: String,
    pub color: String,
    pub grams: u32,
}

/// Everything read off a single plate. Missing fields are already zero/`None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlateReading {
    pub minutes: u32,
    pub grams: u32,
    pub nozzle: Option<String>,
    pub filaments: Vec<FilamentReading>,
}

/// Page-level fields that do not come from the plates.
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    pub title: String,
    pub image_url: String,
    pub page_url: String,
}

/// Running totals across plates. Filaments keep first-seen order.
#[derive(Debug, Default)]
pub struct JobTotals {
    minutes: u32,
    grams: u32,
    nozzle: Option<String>,
    filaments: Vec<FilamentReading>,
    index: HashMap<(String, String), usize>,
    plates: usize,
}

impl JobTotals {
    pub fn add_plate(&mut self, plate: PlateReading) {
        self.plates += 1;
        self.minutes = self.minutes.saturating_add(plate.minutes);
        self.grams = self.grams.saturating_add(plate.grams);

        if let Some(nozzle) = plate.nozzle {
            if let Some(previous) = self.nozzle.as_deref().filter(|p| *p != nozzle) {
                tracing::warn!(previous, current = %nozzle, "plates report different nozzle sizes");
            }
            self.nozzle = Some(nozzle);
        }

        for filament in plate.filaments {
            self.add_filament(filament);
        }
    }

    fn add_filament(&mut self, filament: FilamentReading) {
        let key = (filament.material.clone(), filament.color.clone());
        match self.index.get(&key) {
            Some(&idx) => {
                let entry = &mut self.filaments[idx];
                entry.grams = entry.grams.saturating_add(filament.grams);
            }
            None => {
                self.index.insert(key, self.filaments.len());
                self.filaments.push(filament);
            }
        }
    }

    pub fn finish(self, page: PageMeta) -> PrintJobSummary {
        PrintJobSummary {
            title: page.title,
            image_url: page.image_url,
            page_url: page.page_url,
            print_time: format_minutes(self.minutes),
            total_weight: format_grams(self.grams),
            nozzle_size: self.nozzle,
            filaments: self
                .filaments
                .into_iter()
                .map(|f| FilamentEntry {
                    material: f.material,
                    weight: format_grams(f.grams),
                    color: f.color,
                })
                .collect(),
            plate_count: self.plates,
        }
    }
}

/// Fold plate readings into a job summary.
pub fn summarize(plates: impl IntoIterator<Item = PlateReading>, page: PageMeta) -> PrintJobSummary {
    let mut totals = JobTotals::default();
    for plate in plates {
        totals.add_plate(plate);
    }
    totals.finish(page)
}
