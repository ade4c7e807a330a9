//! # Scam Detector
//! Classifies a message against a catalog of scam types. Each type carries
//! weighted indicator groups; confidence is the matched share of the type's
//! total indicator weight, so no single group can cross the detection
//! threshold on its own with the shipped defaults.
//!
//! The analysis summary is a deterministic template, not model output.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::matcher::PatternSet;
use crate::store::ConfigStore;

pub const SCAM_CATALOG_KEY: &str = "scam_detector_catalog";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScamCatalog {
    /// Minimum winning confidence for `is_scam = true`.
    pub detection_threshold: f64,
    /// Ordered; ties between equal scores go to the earlier entry.
    pub types: Vec<ScamTypeDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScamTypeDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub indicators: Vec<IndicatorGroup>,
    pub advice: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorGroup {
    pub name: String,
    pub description: String,
    pub weight: f64,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScamIndicator {
    pub name: String,
    pub matches: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScamTypeInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub confidence_score: f64,
    pub advice: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScamAnalysis {
    pub is_scam: bool,
    pub overall_confidence: f64,
    pub scam_type: Option<ScamTypeInfo>,
    pub indicators: Vec<ScamIndicator>,
    pub analysis_summary: String,
}

impl ScamAnalysis {
    fn negative(summary: &str) -> Self {
        Self {
            is_scam: false,
            overall_confidence: 0.0,
            scam_type: None,
            indicators: Vec::new(),
            analysis_summary: summary.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScamExample {
    pub title: String,
    pub text: String,
}

/// Pattern sets compiled from a catalog, aligned with its type and group
/// order. Built once per catalog revision, not per message.
pub struct CompiledCatalog {
    type_sets: Vec<Vec<PatternSet>>,
}

impl CompiledCatalog {
    pub fn compile(catalog: &ScamCatalog) -> Self {
        let type_sets = catalog
            .types
            .iter()
            .map(|def| {
                def.indicators
                    .iter()
                    .map(|g| PatternSet::compile(&g.patterns))
                    .collect()
            })
            .collect();
        Self { type_sets }
    }
}

pub struct ScamDetector {
    config: Arc<ConfigStore>,
    compiled: Mutex<Option<(ScamCatalog, Arc<CompiledCatalog>)>>,
}

impl ScamDetector {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            compiled: Mutex::new(None),
        }
    }

    pub fn current_catalog(&self) -> ScamCatalog {
        self.config
            .get_or_default(SCAM_CATALOG_KEY, defaults::scam_catalog)
    }

    pub fn replace_catalog(&self, catalog: &ScamCatalog) -> anyhow::Result<()> {
        self.config.replace(SCAM_CATALOG_KEY, catalog)
    }

    pub fn analyze(&self, text: &str, _language: &str) -> ScamAnalysis {
        let catalog = self.current_catalog();
        let compiled = self.compiled_for(&catalog);
        analyze_compiled(text, &catalog, &compiled)
    }

    /// Serve the cached compiled sets, recompiling only when the stored
    /// catalog document changed since the last message.
    fn compiled_for(&self, catalog: &ScamCatalog) -> Arc<CompiledCatalog> {
        let mut cache = self.compiled.lock().expect("scam pattern cache mutex poisoned");
        match cache.as_ref() {
            Some((cached, compiled)) if cached == catalog => compiled.clone(),
            _ => {
                let compiled = Arc::new(CompiledCatalog::compile(catalog));
                *cache = Some((catalog.clone(), compiled.clone()));
                compiled
            }
        }
    }

    /// Placeholder until an OCR/vision pipeline exists: every image is
    /// reported clean with zero indicators.
    pub fn analyze_image(&self, _image_url: &str) -> ScamAnalysis {
        ScamAnalysis::negative("圖片分析功能開發中，目前無法分析圖片中的詐騙風險。")
    }

    pub fn examples(&self) -> Vec<ScamExample> {
        defaults::scam_examples()
    }
}

pub fn analyze_with_catalog(text: &str, catalog: &ScamCatalog) -> ScamAnalysis {
    analyze_compiled(text, catalog, &CompiledCatalog::compile(catalog))
}

fn analyze_compiled(text: &str, catalog: &ScamCatalog, compiled: &CompiledCatalog) -> ScamAnalysis {
    if text.trim().chars().count() < 2 {
        return ScamAnalysis::negative(NO_SCAM_SUMMARY);
    }

    // Score every type and collect matched indicators across the catalog,
    // deduplicated by indicator name with matches merged.
    let mut best: Option<(usize, f64)> = None;
    let mut indicators: Vec<ScamIndicator> = Vec::new();

    for (idx, (def, sets)) in catalog.types.iter().zip(&compiled.type_sets).enumerate() {
        let total_weight: f64 = def.indicators.iter().map(|g| g.weight).sum();
        if total_weight <= 0.0 {
            continue;
        }
        let mut matched_weight = 0.0;
        for (group, set) in def.indicators.iter().zip(sets) {
            let hits = set.find_matches(text);
            if hits.is_empty() {
                continue;
            }
            matched_weight += group.weight;
            merge_indicator(&mut indicators, group, hits);
        }
        let confidence = matched_weight / total_weight;
        // Strictly-greater keeps the earlier catalog entry on ties.
        if best.map_or(confidence > 0.0, |(_, c)| confidence > c) {
            best = Some((idx, confidence));
        }
    }

    let Some((idx, confidence)) = best else {
        return ScamAnalysis::negative(NO_SCAM_SUMMARY);
    };

    let winner = &catalog.types[idx];
    let is_scam = confidence >= catalog.detection_threshold;
    let scam_type = ScamTypeInfo {
        id: winner.id.clone(),
        name: winner.name.clone(),
        description: winner.description.clone(),
        confidence_score: confidence,
        advice: winner.advice.clone(),
    };
    let summary = if is_scam {
        positive_summary(&scam_type, &indicators, confidence)
    } else {
        NO_SCAM_SUMMARY.to_string()
    };

    ScamAnalysis {
        is_scam,
        overall_confidence: confidence,
        scam_type: Some(scam_type),
        indicators,
        analysis_summary: summary,
    }
}

const NO_SCAM_SUMMARY: &str =
    "此訊息未顯示明顯的詐騙特徵。但詐騙手法日益精進，若有懷疑請多加留意。";

fn merge_indicator(indicators: &mut Vec<ScamIndicator>, group: &IndicatorGroup, hits: Vec<String>) {
    if let Some(existing) = indicators.iter_mut().find(|i| i.name == group.name) {
        for h in hits {
            if !existing.matches.contains(&h) {
                existing.matches.push(h);
            }
        }
    } else {
        indicators.push(ScamIndicator {
            name: group.name.clone(),
            matches: hits,
            description: group.description.clone(),
        });
    }
}

fn positive_summary(scam_type: &ScamTypeInfo, indicators: &[ScamIndicator], confidence: f64) -> String {
    let percent = (confidence * 100.0).round() as u32;
    let level = if confidence < 0.5 {
        "低"
    } else if confidence < 0.75 {
        "中"
    } else {
        "高"
    };
    let mut out = format!(
        "此訊息極有可能是【{}】。風險評估：{}級風險 ({}%)。\n\n{}\n\n",
        scam_type.name, level, percent, scam_type.description
    );
    if !indicators.is_empty() {
        out.push_str("檢測到的可疑元素：\n");
        for (i, ind) in indicators.iter().take(3).enumerate() {
            out.push_str(&format!("{}. {}：{}\n", i + 1, ind.name, ind.description));
        }
        if indicators.len() > 3 {
            out.push_str(&format!("...以及其他 {} 個可疑元素\n", indicators.len() - 3));
        }
    }
    if !scam_type.advice.is_empty() {
        out.push_str("\n安全建議：\n");
        for (i, advice) in scam_type.advice.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, advice));
        }
    }
    out.push_str("\n若您已提供個人資料或進行轉帳，請立即聯絡相關機構並撥打165防詐騙專線。");
    out
}
