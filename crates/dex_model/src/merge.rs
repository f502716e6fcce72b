use std::{collections::HashSet, fmt};

use dexmerge_dex_file::{ClassId, ClassMerge, SectionKind, TypeKey};
use log::debug;

use crate::{DexFile, DexModelError, Result};

/// What a directory merge does when the destination container at the cursor is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowAction {
    /// Append a fresh container and continue there.
    CreateContainer,
    /// Leave the remaining classes in the source.
    Stop,
}

type SkipFilter = Box<dyn Fn(&TypeKey) -> bool>;

/// State of one merge run.
///
/// Every class offered to a destination ends up handled exactly once: merged,
/// recorded as a duplicate, or vetoed by the skip filter. A handled class is
/// never offered again, which lets non-relocating runs leave the source intact.
/// `merge_start` is the destination container index where the next directory
/// merge resumes.
pub struct MergePolicy {
    relocate: bool,
    overflow: OverflowAction,
    skip: Option<SkipFilter>,
    merge_start: usize,
    handled: HashSet<TypeKey>,
    merged: Vec<TypeKey>,
    duplicates: Vec<TypeKey>,
    overflows: Vec<(String, TypeKey, SectionKind)>,
}

impl MergePolicy {
    /// Copies classes: a container merge leaves the source container as it
    /// was. A directory merge still consumes the source directory, see
    /// [`crate::DexDirectory::merge`].
    pub fn new() -> Self {
        Self {
            relocate: false,
            overflow: OverflowAction::CreateContainer,
            skip: None,
            merge_start: 0,
            handled: HashSet::new(),
            merged: vec![],
            duplicates: vec![],
            overflows: vec![],
        }
    }

    /// Moves classes: each merged or duplicate class is removed from its source.
    pub fn relocating() -> Self {
        Self {
            relocate: true,
            ..Self::new()
        }
    }

    pub fn with_overflow(mut self, overflow: OverflowAction) -> Self {
        self.overflow = overflow;
        self
    }

    /// Classes matching `skip` are never copied.
    pub fn with_skip(mut self, skip: impl Fn(&TypeKey) -> bool + 'static) -> Self {
        self.skip = Some(Box::new(skip));
        self
    }

    pub fn with_merge_start(mut self, merge_start: usize) -> Self {
        self.merge_start = merge_start;
        self
    }

    pub fn relocates(&self) -> bool {
        self.relocate
    }

    pub fn overflow(&self) -> OverflowAction {
        self.overflow
    }

    pub fn merge_start(&self) -> usize {
        self.merge_start
    }

    pub fn set_merge_start(&mut self, merge_start: usize) {
        self.merge_start = merge_start;
    }

    pub fn merged(&self) -> &[TypeKey] {
        &self.merged
    }

    pub fn duplicates(&self) -> &[TypeKey] {
        &self.duplicates
    }

    /// Container name, class and kind of every capacity refusal.
    pub fn overflows(&self) -> &[(String, TypeKey, SectionKind)] {
        &self.overflows
    }

    pub fn is_handled(&self, key: &TypeKey) -> bool {
        self.handled.contains(key)
    }

    /// Whether `key` must not be copied. Vetoed keys count as handled.
    pub fn skip_merging(&mut self, key: &TypeKey) -> bool {
        if self.handled.contains(key) {
            return true;
        }
        if self.skip.as_ref().map_or(false, |skip| skip(key)) {
            debug!("Skipped {}", key);
            self.handled.insert(key.clone());
            return true;
        }
        false
    }

    pub fn on_duplicate(&mut self, key: &TypeKey) {
        debug!("Duplicate {}", key);
        self.handled.insert(key.clone());
        self.duplicates.push(key.clone());
    }

    /// Records a capacity refusal. What happens next is up to
    /// [`MergePolicy::overflow`], read by the directory merge.
    pub fn on_dex_full(&mut self, container: &str, key: &TypeKey, kind: SectionKind) {
        debug!("{} is full of {} ids, refused {}", container, kind, key);
        self.overflows
            .push((container.to_owned(), key.clone(), kind));
    }

    pub fn on_merge_success(&mut self, key: &TypeKey) {
        debug!("Merged {}", key);
        self.handled.insert(key.clone());
        self.merged.push(key.clone());
    }

    /// Whether `file` has nothing left to offer.
    pub fn is_exhausted(&self, file: &DexFile) -> bool {
        let container = file.container();
        container.classes().all(|(_, class)| {
            self.handled
                .contains(&container.type_key(class.class_type))
        })
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergePolicy")
            .field("relocate", &self.relocate)
            .field("overflow", &self.overflow)
            .field("skip", &self.skip.is_some())
            .field("merge_start", &self.merge_start)
            .field("merged", &self.merged.len())
            .field("duplicates", &self.duplicates.len())
            .field("overflows", &self.overflows.len())
            .finish()
    }
}

impl DexFile {
    /// Offers one class of `from` to this container. `None` means the policy
    /// skipped it.
    fn offer_class(
        &mut self,
        policy: &mut MergePolicy,
        from: &mut DexFile,
        id: ClassId,
    ) -> Result<Option<ClassMerge>> {
        let key = from
            .container()
            .class_key(id)
            .ok_or(DexModelError::Detached)?;
        if policy.skip_merging(&key) {
            return Ok(None);
        }
        let outcome = self.container_mut().merge_class(from.container(), id)?;
        match outcome {
            ClassMerge::Duplicate => {
                policy.on_duplicate(&key);
                if policy.relocates() {
                    from.container_mut().remove_class(id);
                }
            }
            ClassMerge::Full(kind) => {
                policy.on_dex_full(self.name(), &key, kind);
            }
            ClassMerge::Merged(_) => {
                policy.on_merge_success(&key);
                if policy.relocates() {
                    from.container_mut().remove_class(id);
                }
            }
        }
        Ok(Some(outcome))
    }

    /// Copies one class of `from` into this container. Returns whether it was
    /// actually copied; skipped, duplicate and refused classes return `false`.
    pub fn merge_class(
        &mut self,
        policy: &mut MergePolicy,
        from: &mut DexFile,
        id: ClassId,
    ) -> Result<bool> {
        Ok(matches!(
            self.offer_class(policy, from, id)?,
            Some(ClassMerge::Merged(_))
        ))
    }

    /// Drains `from` into this container, most recently added class first.
    ///
    /// Returns whether every class was absorbed, vetoed or recorded as a
    /// duplicate; `false` means a class hit a capacity limit and the rest of
    /// `from` was left alone.
    pub fn merge_file(&mut self, policy: &mut MergePolicy, from: &mut DexFile) -> Result<bool> {
        let mut merged_all = true;
        for id in from.container().class_ids().into_iter().rev() {
            if let Some(ClassMerge::Full(_)) = self.offer_class(policy, from, id)? {
                merged_all = false;
                break;
            }
        }
        if from.is_empty() {
            from.clear();
        }
        Ok(merged_all)
    }
}

#[cfg(test)]
mod merge_policy_tests {
    use super::*;
    use crate::ClassRepository;
    use dexmerge_dex_file::{AccessFlags, MethodKey, SectionLimits};

    fn file_with(name: &str, classes: &[&str]) -> DexFile {
        let mut file = DexFile::new(name, SectionLimits::default());
        for class in classes {
            file.get_or_create_class(&TypeKey::new(*class));
        }
        file
    }

    #[test]
    fn it_should_copy_without_touching_the_source() {
        let mut to = file_with("classes.dex", &[]);
        let mut from = file_with("classes2.dex", &["La/A;", "La/B;"]);
        let mut policy = MergePolicy::new();

        assert!(to.merge_file(&mut policy, &mut from).unwrap());

        assert_eq!(2, to.container().class_count());
        assert_eq!(2, from.container().class_count());
        assert!(policy.is_exhausted(&from));
    }

    #[test]
    fn it_should_move_classes_when_relocating() {
        let mut to = file_with("classes.dex", &["La/A;"]);
        let mut from = file_with("classes2.dex", &["La/A;", "La/B;"]);
        let mut policy = MergePolicy::relocating();

        assert!(to.merge_file(&mut policy, &mut from).unwrap());

        assert!(from.is_empty());
        assert_eq!(vec![TypeKey::new("La/A;")], policy.duplicates());
        assert_eq!(vec![TypeKey::new("La/B;")], policy.merged());
    }

    #[test]
    fn it_should_honor_the_skip_filter() {
        let mut to = file_with("classes.dex", &[]);
        let mut from = file_with("classes2.dex", &["La/A;", "Lb/B;"]);
        let mut policy = MergePolicy::relocating().with_skip(|key| key.is_in_package("Lb/", true));

        assert!(to.merge_file(&mut policy, &mut from).unwrap());

        assert!(to.contains_class(&TypeKey::new("La/A;")));
        assert!(!to.contains_class(&TypeKey::new("Lb/B;")));
        assert!(from.contains_class(&TypeKey::new("Lb/B;")));
        assert!(policy.is_exhausted(&from));
    }

    #[test]
    fn it_should_record_refusals_and_keep_the_overflow_action() {
        let mut policy = MergePolicy::new().with_overflow(OverflowAction::Stop);

        policy.on_dex_full("classes.dex", &TypeKey::new("La/A;"), SectionKind::MethodId);

        assert_eq!(OverflowAction::Stop, policy.overflow());
        assert_eq!(
            &[("classes.dex".to_owned(), TypeKey::new("La/A;"), SectionKind::MethodId)],
            policy.overflows()
        );
        assert!(!policy.is_handled(&TypeKey::new("La/A;")));
    }

    #[test]
    fn it_should_stop_at_the_first_full_class() {
        let limits = SectionLimits::default()
            .with_reserve(0)
            .with_limit(SectionKind::MethodId, 1);
        let mut to = DexFile::new("classes.dex", limits);
        let mut from = file_with("classes2.dex", &["La/A;", "La/B;"]);
        for class in ["La/A;", "La/B;"] {
            let key: MethodKey = format!("{}->run()V", class).parse().unwrap();
            from.get_or_create_method(&key, AccessFlags::PUBLIC).unwrap();
        }
        let mut policy = MergePolicy::relocating();

        assert!(!to.merge_file(&mut policy, &mut from).unwrap());

        assert_eq!(vec![TypeKey::new("La/B;")], policy.merged());
        assert_eq!(1, policy.overflows().len());
        assert!(from.contains_class(&TypeKey::new("La/A;")));
    }
}
