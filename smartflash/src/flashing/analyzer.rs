use std::collections::VecDeque;

use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use smartflash_target::FlashGeometry;

use super::{AnalysisPreference, FlashError, FlashPage, FlashPhase, PartialState};
use crate::queue::{DeferredReadIndex, ReadQueue};
use crate::{FlashTarget, TransportError};

/// CRC-32 as computed by the checksum routine on the target.
pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// How a page of the layout relates to the current flash content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageClassification {
    /// The flash already holds the desired content.
    Unchanged,
    /// The flash content differs from the desired content.
    Changed,
    /// The desired content is all erased bytes and the flash is already erased.
    BlankErased,
}

/// The comparison method used to classify pages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, docsplay::Display,
)]
pub enum AnalysisMethod {
    /// CRC32
    Crc32,
    /// Read back
    ReadBack,
}

/// One classified page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedPage {
    /// Index of the page in the layout.
    pub index: usize,
    /// Start address of the page.
    pub address: u32,
    /// The classification.
    pub classification: PageClassification,
}

/// Compares the pages of a layout against the flash content of the target.
///
/// Pages are fetched in batches of `read_ahead` pages, so the transport can
/// keep several requests in flight, but they are always classified in
/// ascending address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAnalyzer {
    /// Reads every page back and compares it byte by byte.
    ReadBack {
        /// Number of pages read in one batch.
        read_ahead: usize,
    },
    /// Compares CRC-32 checksums computed on the target.
    ///
    /// A differing checksum always means the page changed. A matching checksum is
    /// confirmed by reading the page back, unless checksums are trusted.
    Checksum {
        /// Number of pages checked in one batch.
        read_ahead: usize,
        /// Skip the confirmation read for matching checksums.
        trust_checksums: bool,
    },
}

impl PageAnalyzer {
    /// Selects the analyzer for a target according to the preference.
    pub fn select(
        preference: AnalysisPreference,
        target: &dyn FlashTarget,
        read_ahead: usize,
        trust_checksums: bool,
    ) -> Self {
        let checksum = Self::Checksum {
            read_ahead,
            trust_checksums,
        };
        let read_back = Self::ReadBack { read_ahead };

        match preference {
            AnalysisPreference::Auto if target.supports_checksum() => checksum,
            AnalysisPreference::Auto => read_back,
            AnalysisPreference::Checksum if target.supports_checksum() => checksum,
            AnalysisPreference::Checksum => {
                tracing::warn!("The target cannot compute checksums, reading pages back instead.");
                read_back
            }
            AnalysisPreference::ReadBack => read_back,
        }
    }

    /// Returns the comparison method of the analyzer.
    pub fn method(&self) -> AnalysisMethod {
        match self {
            PageAnalyzer::ReadBack { .. } => AnalysisMethod::ReadBack,
            PageAnalyzer::Checksum { .. } => AnalysisMethod::Crc32,
        }
    }

    fn read_ahead(&self) -> usize {
        match *self {
            PageAnalyzer::ReadBack { read_ahead } | PageAnalyzer::Checksum { read_ahead, .. } => {
                read_ahead.max(1)
            }
        }
    }

    /// Classifies `pages` lazily, one page after the other.
    ///
    /// Nothing is cached, every call reads from the target again.
    pub fn classify<'a>(
        &self,
        target: &'a mut dyn FlashTarget,
        geometry: &'a FlashGeometry,
        pages: &'a [FlashPage],
    ) -> Classify<'a> {
        Classify {
            analyzer: *self,
            target,
            geometry,
            pages,
            next: 0,
            ready: VecDeque::new(),
            failed: false,
        }
    }
}

/// Iterator over the classifications of a layout, created by [`PageAnalyzer::classify`].
///
/// After an error the iterator ends.
pub struct Classify<'a> {
    analyzer: PageAnalyzer,
    target: &'a mut dyn FlashTarget,
    geometry: &'a FlashGeometry,
    pages: &'a [FlashPage],
    next: usize,
    ready: VecDeque<ClassifiedPage>,
    failed: bool,
}

impl Iterator for Classify<'_> {
    type Item = Result<ClassifiedPage, FlashError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(page) = self.ready.pop_front() {
            return Some(Ok(page));
        }

        if self.failed || self.next >= self.pages.len() {
            return None;
        }

        match self.fetch_batch() {
            Ok(()) => self.ready.pop_front().map(Ok),
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

impl Classify<'_> {
    fn fetch_batch(&mut self) -> Result<(), FlashError> {
        let start = self.next;
        let end = (start + self.analyzer.read_ahead()).min(self.pages.len());
        self.next = end;

        let batch_address = self.pages[start].address();
        let transport_error = |source: TransportError| FlashError::Transport {
            phase: FlashPhase::Analyzing,
            address: batch_address,
            source,
            partial: PartialState::default(),
        };

        let mut classifications: Vec<Option<PageClassification>> = vec![None; end - start];
        let mut to_compare = Vec::new();

        for index in start..end {
            let page = &self.pages[index];
            if page.is_restored() {
                // The content was read from the flash while filling.
                classifications[index - start] = Some(self.matching(page));
            } else {
                to_compare.push(index);
            }
        }

        let to_read = match self.analyzer {
            PageAnalyzer::ReadBack { .. } => to_compare,
            PageAnalyzer::Checksum {
                trust_checksums, ..
            } => {
                if to_compare.is_empty() {
                    to_compare
                } else {
                    let ranges: Vec<_> = to_compare
                        .iter()
                        .map(|&index| {
                            let page = &self.pages[index];
                            page.address()..page.address() + page.size()
                        })
                        .collect();
                    let checksums = self
                        .target
                        .page_checksums(&ranges)
                        .map_err(transport_error)?;
                    if checksums.len() != ranges.len() {
                        return Err(transport_error(TransportError::Other(format!(
                            "expected {} checksums, got {}",
                            ranges.len(),
                            checksums.len()
                        ))));
                    }

                    let mut to_read = Vec::new();
                    for (&index, checksum) in to_compare.iter().zip(checksums) {
                        let page = &self.pages[index];
                        if checksum != CRC32.checksum(page.data()) {
                            classifications[index - start] = Some(PageClassification::Changed);
                        } else if trust_checksums {
                            classifications[index - start] = Some(self.matching(page));
                        } else {
                            to_read.push(index);
                        }
                    }
                    to_read
                }
            }
        };

        if !to_read.is_empty() {
            let mut queue = ReadQueue::new();
            let scheduled: Vec<(usize, DeferredReadIndex)> = to_read
                .into_iter()
                .map(|index| {
                    let page = &self.pages[index];
                    (
                        index,
                        queue.schedule(page.address()..page.address() + page.size()),
                    )
                })
                .collect();

            let mut results = self
                .target
                .execute_reads(&queue)
                .map_err(transport_error)?;

            for (index, token) in scheduled {
                let page = &self.pages[index];
                let data = results.take(token).map_err(|_| {
                    transport_error(TransportError::Other(format!(
                        "no data returned for page {:#010x}",
                        page.address()
                    )))
                })?;

                classifications[index - start] = Some(if data == page.data() {
                    self.matching(page)
                } else {
                    PageClassification::Changed
                });
            }
        }

        for (offset, classification) in classifications.into_iter().enumerate() {
            let index = start + offset;
            // Every page of the batch got exactly one classification above.
            let classification = classification.unwrap_or(PageClassification::Changed);
            tracing::trace!(
                "Page {:#010x} is {:?}",
                self.pages[index].address(),
                classification
            );
            self.ready.push_back(ClassifiedPage {
                index,
                address: self.pages[index].address(),
                classification,
            });
        }

        Ok(())
    }

    /// Classification of a page whose flash content equals the desired content.
    fn matching(&self, page: &FlashPage) -> PageClassification {
        if self.geometry.is_erased(page.data()) {
            PageClassification::BlankErased
        } else {
            PageClassification::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flashing::{FlashBuilder, FlashLayout};
    use crate::simulated::{DeviceOperation, SimulatedTarget};
    use pretty_assertions::assert_eq;

    use PageClassification::{BlankErased, Changed, Unchanged};

    fn target() -> SimulatedTarget {
        SimulatedTarget::new(FlashGeometry::new(0x0, 0x1000, 0x100, 0x100))
    }

    /// Four pages: unchanged data, an erased page, changed data and a page that must become blank.
    fn scenario(target: &mut SimulatedTarget) -> FlashLayout {
        target.load(0x000, &[0xaa; 0x100]);
        target.load(0x200, &[0x11; 0x100]);
        target.load(0x300, &[0x33; 0x100]);

        let mut image = vec![0xaa; 0x100];
        image.extend([0xff; 0x100]);
        image.extend([0x22; 0x100]);
        image.extend([0xff; 0x100]);

        let mut builder = FlashBuilder::new();
        builder.add_data(0x0, image).unwrap();
        builder.build_sectors_and_pages(target.geometry()).unwrap()
    }

    fn classify_all(
        analyzer: PageAnalyzer,
        target: &mut SimulatedTarget,
        pages: &[FlashPage],
    ) -> Vec<ClassifiedPage> {
        let geometry = target.geometry().clone();
        analyzer
            .classify(target, &geometry, pages)
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn reads(target: &SimulatedTarget) -> Vec<u32> {
        target
            .operations()
            .iter()
            .filter_map(|operation| match operation {
                DeviceOperation::Read { address, .. } => Some(*address),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn read_back_classification() {
        let mut target = target();
        let layout = scenario(&mut target);

        let pages = classify_all(
            PageAnalyzer::ReadBack { read_ahead: 8 },
            &mut target,
            layout.pages(),
        );

        let classifications: Vec<_> = pages.iter().map(|page| page.classification).collect();
        assert_eq!(classifications, vec![Unchanged, BlankErased, Changed, Changed]);
        assert_eq!(reads(&target), vec![0x000, 0x100, 0x200, 0x300]);
    }

    #[test]
    fn checksum_classification_agrees_with_read_back() {
        let mut target = target();
        let layout = scenario(&mut target);

        let pages = classify_all(
            PageAnalyzer::Checksum {
                read_ahead: 8,
                trust_checksums: false,
            },
            &mut target,
            layout.pages(),
        );

        let classifications: Vec<_> = pages.iter().map(|page| page.classification).collect();
        assert_eq!(classifications, vec![Unchanged, BlankErased, Changed, Changed]);

        // Only the matching checksums are confirmed.
        assert_eq!(reads(&target), vec![0x000, 0x100]);
    }

    #[test]
    fn trusted_checksums_read_nothing() {
        let mut target = target();
        let layout = scenario(&mut target);

        let pages = classify_all(
            PageAnalyzer::Checksum {
                read_ahead: 8,
                trust_checksums: true,
            },
            &mut target,
            layout.pages(),
        );

        assert_eq!(pages.len(), 4);
        assert!(reads(&target).is_empty());
        assert_eq!(
            target.operations(),
            &[DeviceOperation::Checksums { count: 4 }]
        );
    }

    #[test]
    fn pages_are_classified_in_ascending_order() {
        let mut target = target();
        let layout = scenario(&mut target);

        let pages = classify_all(
            PageAnalyzer::ReadBack { read_ahead: 3 },
            &mut target,
            layout.pages(),
        );

        let indices: Vec<_> = pages.iter().map(|page| page.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        let addresses: Vec<_> = pages.iter().map(|page| page.address).collect();
        assert_eq!(addresses, vec![0x000, 0x100, 0x200, 0x300]);
    }

    #[test]
    fn batches_are_fetched_lazily() {
        let mut target = target();
        let layout = scenario(&mut target);
        let geometry = target.geometry().clone();

        {
            let mut classify = PageAnalyzer::ReadBack { read_ahead: 2 }.classify(
                &mut target,
                &geometry,
                layout.pages(),
            );
            assert_eq!(classify.next().unwrap().unwrap().classification, Unchanged);
        }

        // One deferred batch of two pages, nothing beyond it.
        assert_eq!(target.stats().round_trips, 1);
        assert_eq!(reads(&target), vec![0x000, 0x100]);
    }

    #[test]
    fn restored_pages_are_not_read() {
        let mut target = target();
        let mut layout = scenario(&mut target);
        layout.pages_mut()[0].set_restored();

        let pages = classify_all(
            PageAnalyzer::ReadBack { read_ahead: 8 },
            &mut target,
            layout.pages(),
        );

        assert_eq!(pages[0].classification, Unchanged);
        assert_eq!(reads(&target), vec![0x100, 0x200, 0x300]);
    }

    #[test]
    fn transport_error_ends_classification() {
        let mut target = target();
        let layout = scenario(&mut target);
        target.disconnect_after(1);
        let geometry = target.geometry().clone();

        let results: Vec<_> = PageAnalyzer::ReadBack { read_ahead: 2 }
            .classify(&mut target, &geometry, layout.pages())
            .collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(
            &results[2],
            Err(FlashError::Transport {
                phase: FlashPhase::Analyzing,
                address: 0x200,
                source: TransportError::Disconnected,
                ..
            })
        ));
    }

    #[test]
    fn checksum_preference_falls_back_to_read_back() {
        let target = SimulatedTarget::with_config(
            FlashGeometry::new(0x0, 0x1000, 0x100, 0x100),
            Default::default(),
            crate::simulated::SimulatedTargetConfig {
                checksum_supported: false,
                ..Default::default()
            },
        );

        let analyzer = PageAnalyzer::select(AnalysisPreference::Checksum, &target, 4, false);
        assert_eq!(analyzer.method(), AnalysisMethod::ReadBack);

        let analyzer = PageAnalyzer::select(AnalysisPreference::Auto, &self::target(), 4, false);
        assert_eq!(analyzer.method(), AnalysisMethod::Crc32);
    }
}
