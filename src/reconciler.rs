//! Reconciler
//!
//! Create, read, update and delete one object of a kind, moving between the
//! host's flat attribute tree and the API through the codec. Each call runs
//! its RPCs one after another under the kind's timeout for that step.

use crate::cancel::{CancellationToken, Deadline};
use crate::codec::encode::encode_field;
use crate::codec::{decode, decode_resource, encode, from_api, settle, to_api, AttributeTree, Block, RequestMode};
use crate::context::{Action, ProviderContext};
use crate::error::{ProviderError, Result};
use crate::resolver::{self, ObjectRef};
use crate::resource::dispatch;
use crate::resource::registry::{get_registry, ResourceDef};

/// Result of reading an object that may have been deleted out of band
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Present(AttributeTree),
    Gone,
}

/// How a reference given both by name and by id is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameAndId {
    /// Fresh configuration: naming both is an error
    Conflict,
    /// A tree built from read state carries the id resolved earlier; the
    /// name is resolved again and its id replaces the old one
    NameWins,
}

/// Lifecycle driver for one kind
pub struct Reconciler<'a> {
    ctx: &'a ProviderContext,
    kind: String,
    def: &'static ResourceDef,
}

impl<'a> Reconciler<'a> {
    pub fn new(ctx: &'a ProviderContext, kind: &str) -> Result<Self> {
        let def = get_registry().get(kind)?;
        Ok(Self {
            ctx,
            kind: kind.to_string(),
            def,
        })
    }

    pub fn def(&self) -> &'static ResourceDef {
        self.def
    }

    fn label(&self, verb: &str, id: Option<&str>) -> String {
        let noun = self.def.display_name.to_lowercase();
        match id {
            Some(id) => format!("{} {} {}", verb, noun, id),
            None => format!("{} {}", verb, noun),
        }
    }

    fn deadline(&self, action: Action) -> Deadline {
        Deadline::after(self.ctx.timeout(action, self.def))
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.def.read_only {
            return Err(ProviderError::InvalidSchema {
                path: self.kind.clone(),
                reason: "lookup-only kind cannot be changed".into(),
            });
        }
        Ok(())
    }

    /// Create the object described by `desired`; returns its id and state
    ///
    /// The id is only known, and only returned, once the operation is done.
    pub async fn create(
        &self,
        desired: &AttributeTree,
        cancel: &CancellationToken,
    ) -> Result<(String, AttributeTree)> {
        self.ensure_mutable()?;
        let deadline = self.deadline(Action::Create);
        let action = self.label("create", None);

        let config = decode_resource(desired, &self.def.schema)?;
        let mut request = config.clone();
        self.fill_parent(&mut request)?;
        self.resolve_references(&mut request, NameAndId::Conflict, &deadline, cancel)
            .await?;

        let body = to_api(&request, &self.def.schema, RequestMode::Create)?;
        tracing::info!("{}", action);
        let operation = self
            .ctx
            .call_and_wait(&action, dispatch::create(self.def, body), &deadline, cancel)
            .await?;

        let id = operation
            .object_id(self.def.metadata_id_field.as_deref())
            .ok_or_else(|| {
                ProviderError::mismatch(&action, "operation carrying the new id", "no id in response or metadata")
            })?;
        tracing::info!("{}: created {}", action, id);

        match self.fetch(&id, &deadline, cancel).await? {
            Some(state) => Ok((id, self.to_tree(state, &config)?)),
            None => Err(ProviderError::NotFound {
                what: format!("{} {} right after creation", self.def.display_name, id),
            }),
        }
    }

    /// Read the current state; a missing object is [`ReadOutcome::Gone`]
    ///
    /// `prior` supplies values the API does not echo back, such as the names
    /// references were resolved from.
    pub async fn read(
        &self,
        id: &str,
        prior: Option<&AttributeTree>,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome> {
        let deadline = self.deadline(Action::Read);
        let prior = match prior {
            Some(tree) => decode(tree, &self.def.schema)?,
            None => Block::new(),
        };

        match self.fetch(id, &deadline, cancel).await? {
            Some(state) => Ok(ReadOutcome::Present(self.to_tree(state, &prior)?)),
            None => {
                tracing::info!("{} is gone", self.label("read", Some(id)));
                Ok(ReadOutcome::Gone)
            }
        }
    }

    /// Bring the object from `prior` to `desired`
    ///
    /// Only changed top-level fields are sent, named in `updateMask`. With
    /// nothing changed this is a plain read.
    pub async fn update(
        &self,
        id: &str,
        prior: &AttributeTree,
        desired: &AttributeTree,
        cancel: &CancellationToken,
    ) -> Result<AttributeTree> {
        self.ensure_mutable()?;
        let deadline = self.deadline(Action::Update);
        let action = self.label("update", Some(id));

        let config = decode_resource(desired, &self.def.schema)?;
        let before = settle(&decode(prior, &self.def.schema)?, &self.def.schema)?;

        let mut wanted = config.clone();
        self.fill_parent(&mut wanted)?;
        self.resolve_references(&mut wanted, NameAndId::NameWins, &deadline, cancel)
            .await?;
        let wanted = settle(&wanted, &self.def.schema)?;

        let changed = self.changed_fields(&before, &wanted)?;
        if !changed.is_empty() {
            let mut request = Block::new();
            let mut mask = Vec::with_capacity(changed.len());
            for name in &changed {
                request.set(name.clone(), wanted.get(name).clone());
                if let Some(field) = self.def.schema.field(name) {
                    mask.push(field.api_name(name));
                }
            }

            let mut body = to_api(&request, &self.def.schema, RequestMode::Update)?;
            if let Some(object) = body.as_object_mut() {
                object.insert("updateMask".into(), mask.join(",").into());
            }

            tracing::info!("{}: {}", action, changed.join(", "));
            self.ctx
                .call_and_wait(&action, dispatch::update(self.def, id, body), &deadline, cancel)
                .await?;
        } else {
            tracing::debug!("{}: nothing changed", action);
        }

        match self.fetch(id, &deadline, cancel).await? {
            Some(state) => self.to_tree(state, &config),
            None => Err(ProviderError::NotFound {
                what: format!("{} {}", self.def.display_name, id),
            }),
        }
    }

    /// Delete the object; one that is already gone counts as deleted
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        self.ensure_mutable()?;
        let deadline = self.deadline(Action::Delete);
        let action = self.label("delete", Some(id));

        tracing::info!("{}", action);
        match self
            .ctx
            .call_and_wait(&action, dispatch::delete(self.def, id), &deadline, cancel)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::info!("{}: already gone", action);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Full state from nothing but an id
    pub async fn import(&self, id: &str, cancel: &CancellationToken) -> Result<AttributeTree> {
        match self.read(id, None, cancel).await? {
            ReadOutcome::Present(tree) => Ok(tree),
            ReadOutcome::Gone => Err(ProviderError::NotFound {
                what: format!("{} {}", self.def.display_name, id),
            }),
        }
    }

    /// Look an object up by id or by name; returns its id and state
    pub async fn read_data_source(
        &self,
        query: &AttributeTree,
        cancel: &CancellationToken,
    ) -> Result<(String, AttributeTree)> {
        let Some(lookup) = &self.def.data_source else {
            return Err(ProviderError::InvalidSchema {
                path: self.kind.clone(),
                reason: "kind has no data source lookup".into(),
            });
        };
        let deadline = self.deadline(Action::Read);

        let config = decode_resource(query, &self.def.schema)?;
        let reference = ObjectRef::from_pair(
            &lookup.id_field,
            config.get_str(&lookup.id_field),
            &lookup.name_field,
            config.get_str(&lookup.name_field),
        )?;
        let scope = self
            .def
            .parent
            .as_ref()
            .and_then(|p| config.get_str(&p.field));

        let id = resolver::resolve(self.ctx, self.def, &reference, scope, &deadline, cancel).await?;

        match self.fetch(&id, &deadline, cancel).await? {
            Some(state) => Ok((id.clone(), self.to_tree(state, &config)?)),
            None => Err(ProviderError::NotFound {
                what: format!("{} {}", self.def.display_name, id),
            }),
        }
    }

    /// Get by id; `None` when the API reports the object as absent
    async fn fetch(
        &self,
        id: &str,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Result<Option<Block>> {
        let action = self.label("read", Some(id));
        match self.ctx.call(&action, dispatch::get(self.def, id), deadline, cancel).await {
            Ok(json) => Ok(Some(from_api(&json, &self.def.schema)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Default the parent field from the context when the config omits it
    fn fill_parent(&self, block: &mut Block) -> Result<()> {
        let Some(parent) = &self.def.parent else {
            return Ok(());
        };
        if block.get(&parent.field).is_unset() {
            if let Some((_, id)) = resolver::scope_for(self.ctx, self.def, None)? {
                block.set(parent.field.clone(), id.into());
            }
        }
        Ok(())
    }

    /// Replace name references with the ids they resolve to
    async fn resolve_references(
        &self,
        block: &mut Block,
        both: NameAndId,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let scope = self
            .def
            .parent
            .as_ref()
            .and_then(|p| block.get_str(&p.field))
            .map(|s| s.to_string());

        for reference in &self.def.references {
            let name = block.get_str(&reference.name_field);
            let id = block.get_str(&reference.id_field);
            let object = match (name, id, both) {
                (None, None, _) => continue,
                (Some(name), Some(_), NameAndId::NameWins) => ObjectRef::Name(name.to_string()),
                _ => ObjectRef::from_pair(&reference.id_field, id, &reference.name_field, name)?,
            };
            let target = get_registry().get(&reference.resource)?;
            let resolved =
                resolver::resolve(self.ctx, target, &object, scope.as_deref(), deadline, cancel).await?;

            block.remove(&reference.name_field);
            block.set(reference.id_field.clone(), resolved.into());
        }
        Ok(())
    }

    /// Top-level fields whose desired value differs from the prior state
    fn changed_fields(&self, before: &Block, wanted: &Block) -> Result<Vec<String>> {
        let reference_names: Vec<&str> = self
            .def
            .references
            .iter()
            .map(|r| r.name_field.as_str())
            .collect();

        let mut changed = Vec::new();
        for (name, field) in self.def.schema.iter() {
            if field.computed || reference_names.contains(&name.as_str()) {
                continue;
            }

            let mut old = AttributeTree::new();
            encode_field(&mut old, name, before.get(name), field)?;
            let mut new = AttributeTree::new();
            encode_field(&mut new, name, wanted.get(name), field)?;
            if old == new {
                continue;
            }

            if field.force_new {
                tracing::warn!(
                    "{}: '{}' cannot change in place and is left to replacement",
                    self.label("update", None),
                    name
                );
                continue;
            }
            changed.push(name.clone());
        }
        Ok(changed)
    }

    /// Encode a read state, carrying over what only the config knows
    fn to_tree(&self, mut state: Block, config: &Block) -> Result<AttributeTree> {
        for reference in &self.def.references {
            let name = config.get(&reference.name_field);
            if !name.is_unset() {
                state.set(reference.name_field.clone(), name.clone());
            }
        }
        encode(&state, &self.def.schema)
    }
}
